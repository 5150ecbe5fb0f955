use crate::models::{Policy, StudentRecord};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("configuration provides no houses")]
    EmptyHouseSet,
    #[error("duplicate house code in configuration: {0}")]
    DuplicateHouse(String),
    #[error("unrecognized policy: {0} (expected greedy-minimum or round-robin)")]
    InvalidPolicy(String),
    #[error("record {row_id} is missing {field}")]
    MissingClassificationKey { row_id: usize, field: &'static str },
    #[error("records left without a house: {row_ids:?}")]
    IncompleteAssignment { row_ids: Vec<usize> },
}

/// Run-scoped usage tallies, one cell per (key, house) pair.
///
/// Three independent dimensions: gender, program+semester, program. Cells
/// only ever increment, and a key that was never touched reads as zero.
/// The program+semester dimension is keyed by a composite
/// `"{program}_{semester}"` string.
#[derive(Debug, Clone)]
pub struct UsageCounters {
    house_count: usize,
    by_gender: HashMap<String, Vec<u64>>,
    by_program_semester: HashMap<String, Vec<u64>>,
    by_program: HashMap<String, Vec<u64>>,
}

impl UsageCounters {
    fn new(house_count: usize) -> Self {
        Self {
            house_count,
            by_gender: HashMap::new(),
            by_program_semester: HashMap::new(),
            by_program: HashMap::new(),
        }
    }

    fn cell(map: &HashMap<String, Vec<u64>>, key: &str, house: usize) -> u64 {
        map.get(key).map(|counts| counts[house]).unwrap_or(0)
    }

    pub fn gender_count(&self, gender: &str, house: usize) -> u64 {
        Self::cell(&self.by_gender, gender, house)
    }

    pub fn program_semester_count(&self, key: &str, house: usize) -> u64 {
        Self::cell(&self.by_program_semester, key, house)
    }

    pub fn program_count(&self, program: &str, house: usize) -> u64 {
        Self::cell(&self.by_program, program, house)
    }

    /// The lexicographic tie-break key for one candidate house.
    pub fn selection_key(
        &self,
        gender: &str,
        program_semester: &str,
        program: &str,
        house: usize,
    ) -> (u64, u64, u64) {
        (
            self.gender_count(gender, house),
            self.program_semester_count(program_semester, house),
            self.program_count(program, house),
        )
    }

    /// Record one assignment: bump all three dimensions for the chosen house.
    fn record(&mut self, gender: &str, program_semester: &str, program: &str, house: usize) {
        let house_count = self.house_count;
        for (map, key) in [
            (&mut self.by_gender, gender),
            (&mut self.by_program_semester, program_semester),
            (&mut self.by_program, program),
        ] {
            let counts = map
                .entry(key.to_string())
                .or_insert_with(|| vec![0; house_count]);
            counts[house] += 1;
        }
    }
}

/// A record excluded from allocation because a classification key is absent.
#[derive(Debug)]
pub struct UnassignedRecord {
    pub row_id: usize,
    pub source_file: String,
    /// One `MissingClassificationKey` per absent field.
    pub errors: Vec<AllocationError>,
}

/// Outcome of one allocation run.
#[derive(Debug)]
pub struct AllocationReport {
    pub assigned_count: usize,
    pub unassigned: Vec<UnassignedRecord>,
    pub counters: UsageCounters,
}

/// One (Program, Semester, Gender) group in partitioner order; `rows` are
/// indices into the input slice, in input order.
struct Group {
    program: String,
    semester: u32,
    gender: String,
    rows: Vec<usize>,
}

#[derive(Debug)]
pub struct HouseAllocator {
    houses: Vec<String>,
    policy: Policy,
}

impl HouseAllocator {
    /// Validates the house list up front; the policy is fixed for the
    /// allocator's lifetime.
    pub fn new(houses: Vec<String>, policy: Policy) -> Result<Self, AllocationError> {
        if houses.is_empty() {
            return Err(AllocationError::EmptyHouseSet);
        }
        let mut seen = HashSet::new();
        for house in &houses {
            if !seen.insert(house.as_str()) {
                return Err(AllocationError::DuplicateHouse(house.clone()));
            }
        }
        Ok(Self { houses, policy })
    }

    pub fn houses(&self) -> &[String] {
        &self.houses
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Assign a house to every classifiable record, in place.
    ///
    /// Records missing Program, Semester or Gender are excluded and listed
    /// in the report rather than aborting the run. A classifiable record
    /// left without a house after processing fails the whole run.
    pub fn allocate(&self, records: &mut [StudentRecord]) -> Result<AllocationReport, AllocationError> {
        // Step 1: partition into (Program, Semester, Gender) groups,
        // collecting unclassifiable records on the side.
        let (groups, unassigned) = partition(records);

        // Step 2: fresh counters for this run.
        let mut counters = UsageCounters::new(self.houses.len());

        // Step 3: walk groups in partitioner order, one decision per record.
        for group in &groups {
            let program_semester = format!("{}_{}", group.program, group.semester);
            for (position, &row) in group.rows.iter().enumerate() {
                let house = match self.policy {
                    Policy::GreedyMinimum => {
                        self.pick_least_used(&counters, &group.gender, &program_semester, &group.program)
                    }
                    Policy::RoundRobin => position % self.houses.len(),
                };
                records[row].house = Some(self.houses[house].clone());
                counters.record(&group.gender, &program_semester, &group.program, house);
            }
        }

        // Step 4: every classifiable record must now carry a house.
        let stranded: Vec<usize> = records
            .iter()
            .filter(|r| r.classification().is_some() && r.house.is_none())
            .map(|r| r.row_id)
            .collect();
        if !stranded.is_empty() {
            return Err(AllocationError::IncompleteAssignment { row_ids: stranded });
        }

        let assigned_count = records.iter().filter(|r| r.house.is_some()).count();
        Ok(AllocationReport {
            assigned_count,
            unassigned,
            counters,
        })
    }

    /// The greedy-minimum choice: smallest (gender, program+semester,
    /// program) usage tuple, earliest house in canonical order on a full tie.
    fn pick_least_used(
        &self,
        counters: &UsageCounters,
        gender: &str,
        program_semester: &str,
        program: &str,
    ) -> usize {
        let mut best = 0;
        let mut best_key = counters.selection_key(gender, program_semester, program, 0);
        for house in 1..self.houses.len() {
            let key = counters.selection_key(gender, program_semester, program, house);
            if key < best_key {
                best = house;
                best_key = key;
            }
        }
        best
    }
}

/// Distinct values of `key` over `rows`, in first-seen order.
fn first_seen<'a>(
    records: &'a [StudentRecord],
    rows: &[usize],
    key: impl Fn(&'a StudentRecord) -> &'a str,
) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    let mut ordered = Vec::new();
    for &row in rows {
        let value = key(&records[row]);
        if seen.insert(value) {
            ordered.push(value);
        }
    }
    ordered
}

/// Group classifiable records by (Program), then (Program, Semester), then
/// (Program, Semester, Gender), preserving first-seen order at every level
/// and input order within each group. Records with a missing key go into the
/// unassigned list instead of a group.
fn partition(records: &[StudentRecord]) -> (Vec<Group>, Vec<UnassignedRecord>) {
    let mut eligible = Vec::new();
    let mut unassigned = Vec::new();
    for (row, record) in records.iter().enumerate() {
        if record.classification().is_some() {
            eligible.push(row);
        } else {
            let errors = record
                .missing_fields()
                .into_iter()
                .map(|field| AllocationError::MissingClassificationKey {
                    row_id: record.row_id,
                    field,
                })
                .collect();
            unassigned.push(UnassignedRecord {
                row_id: record.row_id,
                source_file: record.source_file.clone(),
                errors,
            });
        }
    }

    let mut groups = Vec::new();
    let programs: Vec<String> = first_seen(records, &eligible, |r| r.program.as_deref().unwrap())
        .into_iter()
        .map(str::to_string)
        .collect();
    for program in &programs {
        let program_rows: Vec<usize> = eligible
            .iter()
            .copied()
            .filter(|&row| records[row].program.as_deref() == Some(program.as_str()))
            .collect();

        let mut semesters = Vec::new();
        for &row in &program_rows {
            let semester = records[row].semester.unwrap();
            if !semesters.contains(&semester) {
                semesters.push(semester);
            }
        }
        for &semester in &semesters {
            let semester_rows: Vec<usize> = program_rows
                .iter()
                .copied()
                .filter(|&row| records[row].semester == Some(semester))
                .collect();

            let genders: Vec<String> = first_seen(records, &semester_rows, |r| r.gender.as_deref().unwrap())
                .into_iter()
                .map(str::to_string)
                .collect();
            for gender in genders {
                let rows: Vec<usize> = semester_rows
                    .iter()
                    .copied()
                    .filter(|&row| records[row].gender.as_deref() == Some(gender.as_str()))
                    .collect();
                groups.push(Group {
                    program: program.clone(),
                    semester,
                    gender,
                    rows,
                });
            }
        }
    }

    (groups, unassigned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn record(row_id: usize, program: &str, semester: u32, gender: &str) -> StudentRecord {
        StudentRecord {
            row_id,
            source_file: "test.csv".to_string(),
            program: Some(program.to_string()),
            semester: Some(semester),
            gender: Some(gender.to_string()),
            house: None,
            values: HashMap::new(),
        }
    }

    fn houses(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    fn assigned(records: &[StudentRecord]) -> Vec<&str> {
        records.iter().map(|r| r.house.as_deref().unwrap()).collect()
    }

    #[test]
    fn empty_house_set_is_rejected() {
        let err = HouseAllocator::new(vec![], Policy::GreedyMinimum).unwrap_err();
        assert!(matches!(err, AllocationError::EmptyHouseSet));
    }

    #[test]
    fn duplicate_house_code_is_rejected() {
        let err = HouseAllocator::new(houses(&["A", "B", "A"]), Policy::GreedyMinimum).unwrap_err();
        match err {
            AllocationError::DuplicateHouse(code) => assert_eq!(code, "A"),
            other => panic!("expected DuplicateHouse, got {other:?}"),
        }
    }

    #[test]
    fn greedy_single_group_cycles_through_canonical_order() {
        // Five records in one (CS, 1, F) group: first four ties resolve in
        // canonical order, the fifth goes back to the least-used front.
        let allocator = HouseAllocator::new(houses(&["M", "L", "T", "D"]), Policy::GreedyMinimum).unwrap();
        let mut records: Vec<StudentRecord> = (0..5).map(|i| record(i, "CS", 1, "F")).collect();
        let report = allocator.allocate(&mut records).unwrap();

        assert_eq!(assigned(&records), vec!["M", "L", "T", "D", "M"]);
        assert_eq!(report.assigned_count, 5);
        assert!(report.unassigned.is_empty());
    }

    #[test]
    fn round_robin_assigns_by_position_in_group() {
        let allocator = HouseAllocator::new(houses(&["A", "B", "C", "D"]), Policy::RoundRobin).unwrap();
        let mut records: Vec<StudentRecord> = (0..6).map(|i| record(i, "CS", 1, "M")).collect();
        allocator.allocate(&mut records).unwrap();

        assert_eq!(assigned(&records), vec!["A", "B", "C", "D", "A", "B"]);
    }

    #[test]
    fn round_robin_still_maintains_counters() {
        let allocator = HouseAllocator::new(houses(&["A", "B"]), Policy::RoundRobin).unwrap();
        let mut records: Vec<StudentRecord> = (0..4).map(|i| record(i, "CS", 1, "M")).collect();
        let report = allocator.allocate(&mut records).unwrap();

        let total: u64 = (0..2).map(|h| report.counters.gender_count("M", h)).sum();
        assert_eq!(total, 4);
        assert_eq!(report.counters.program_count("CS", 0), 2);
        assert_eq!(report.counters.program_count("CS", 1), 2);
    }

    #[test]
    fn every_record_gets_exactly_one_house() {
        let allocator = HouseAllocator::new(houses(&["M", "U", "T", "L"]), Policy::GreedyMinimum).unwrap();
        let mut records = Vec::new();
        let mut row = 0;
        for program in ["CS", "EE", "ME"] {
            for semester in [1, 3] {
                for gender in ["M", "F"] {
                    for _ in 0..5 {
                        records.push(record(row, program, semester, gender));
                        row += 1;
                    }
                }
            }
        }
        let input_len = records.len();
        let report = allocator.allocate(&mut records).unwrap();

        assert_eq!(report.assigned_count, input_len);
        assert!(records.iter().all(|r| r.house.is_some()));
    }

    #[test]
    fn counter_sums_match_processed_record_totals() {
        let allocator = HouseAllocator::new(houses(&["M", "U", "T", "L"]), Policy::GreedyMinimum).unwrap();
        let mut records = Vec::new();
        for i in 0..7 {
            records.push(record(i, "CS", 1, "F"));
        }
        for i in 7..12 {
            records.push(record(i, "EE", 2, "M"));
        }
        let report = allocator.allocate(&mut records).unwrap();

        let female_total: u64 = (0..4).map(|h| report.counters.gender_count("F", h)).sum();
        let male_total: u64 = (0..4).map(|h| report.counters.gender_count("M", h)).sum();
        let cs_total: u64 = (0..4).map(|h| report.counters.program_count("CS", h)).sum();
        let ee_sem_total: u64 = (0..4)
            .map(|h| report.counters.program_semester_count("EE_2", h))
            .sum();
        assert_eq!(female_total, 7);
        assert_eq!(male_total, 5);
        assert_eq!(cs_total, 7);
        assert_eq!(ee_sem_total, 5);
    }

    #[test]
    fn allocation_is_deterministic() {
        let allocator = HouseAllocator::new(houses(&["M", "U", "T", "L"]), Policy::GreedyMinimum).unwrap();
        let build = || -> Vec<StudentRecord> {
            let mut records = Vec::new();
            let mut row = 0;
            for (program, semester, gender, count) in [
                ("CS", 1, "F", 6),
                ("CS", 1, "M", 9),
                ("EE", 1, "F", 4),
                ("EE", 3, "M", 11),
                ("LAW", 2, "F", 5),
            ] {
                for _ in 0..count {
                    records.push(record(row, program, semester, gender));
                    row += 1;
                }
            }
            records
        };

        let mut first = build();
        let mut second = build();
        allocator.allocate(&mut first).unwrap();
        allocator.allocate(&mut second).unwrap();
        assert_eq!(assigned(&first), assigned(&second));
    }

    #[test]
    fn greedy_balance_within_group_spreads_at_most_one() {
        // All three dimensions agree inside a single group, so the spread
        // between the most- and least-used house is at most 1.
        let allocator = HouseAllocator::new(houses(&["M", "U", "T", "L"]), Policy::GreedyMinimum).unwrap();
        let mut records: Vec<StudentRecord> = (0..10).map(|i| record(i, "CS", 1, "F")).collect();
        allocator.allocate(&mut records).unwrap();

        let mut per_house: HashMap<&str, u64> = HashMap::new();
        for record in &records {
            *per_house.entry(record.house.as_deref().unwrap()).or_default() += 1;
        }
        let max = per_house.values().max().unwrap();
        let min = per_house.values().min().unwrap();
        assert!(max - min <= 1, "house spread {per_house:?}");
    }

    #[test]
    fn gender_counts_balance_across_groups() {
        // Two one-record groups sharing a gender: the second record lands on
        // the second house because the gender dimension already counts the
        // first.
        let allocator = HouseAllocator::new(houses(&["A", "B"]), Policy::GreedyMinimum).unwrap();
        let mut records = vec![record(0, "CS", 1, "F"), record(1, "EE", 1, "F")];
        allocator.allocate(&mut records).unwrap();

        assert_eq!(assigned(&records), vec!["A", "B"]);
    }

    #[test]
    fn missing_semester_is_reported_not_assigned() {
        let allocator = HouseAllocator::new(houses(&["M", "U", "T", "L"]), Policy::GreedyMinimum).unwrap();
        let mut complete: Vec<StudentRecord> = (0..4).map(|i| record(i, "CS", 1, "F")).collect();
        let mut with_gap = complete.clone();
        let mut broken = record(4, "CS", 1, "F");
        broken.semester = None;
        with_gap.insert(2, broken);

        let report = allocator.allocate(&mut with_gap).unwrap();
        allocator.allocate(&mut complete).unwrap();

        assert_eq!(report.unassigned.len(), 1);
        assert_eq!(report.unassigned[0].row_id, 4);
        assert!(matches!(
            report.unassigned[0].errors.as_slice(),
            [AllocationError::MissingClassificationKey { row_id: 4, field: "Semester" }]
        ));
        assert!(with_gap[2].house.is_none());

        // The excluded record does not perturb anyone else's assignment.
        let without_broken: Vec<&str> = with_gap
            .iter()
            .filter(|r| r.row_id != 4)
            .map(|r| r.house.as_deref().unwrap())
            .collect();
        assert_eq!(without_broken, assigned(&complete));
    }

    #[test]
    fn partitioner_keeps_first_seen_group_order() {
        let records = vec![
            record(0, "EE", 2, "M"),
            record(1, "CS", 1, "F"),
            record(2, "EE", 1, "M"),
            record(3, "EE", 2, "F"),
            record(4, "CS", 1, "M"),
        ];
        let (groups, unassigned) = partition(&records);

        let keys: Vec<(String, u32, String)> = groups
            .iter()
            .map(|g| (g.program.clone(), g.semester, g.gender.clone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("EE".to_string(), 2, "M".to_string()),
                ("EE".to_string(), 2, "F".to_string()),
                ("EE".to_string(), 1, "M".to_string()),
                ("CS".to_string(), 1, "F".to_string()),
                ("CS".to_string(), 1, "M".to_string()),
            ]
        );
        assert!(unassigned.is_empty());
    }

    #[test]
    fn untouched_counter_keys_read_as_zero() {
        let counters = UsageCounters::new(4);
        assert_eq!(counters.gender_count("F", 0), 0);
        assert_eq!(counters.program_semester_count("CS_1", 3), 0);
        assert_eq!(counters.program_count("CS", 2), 0);
    }
}
