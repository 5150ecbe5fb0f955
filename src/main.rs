mod allocator;
mod loader;
mod models;

use allocator::{AllocationError, AllocationReport, HouseAllocator};
use anyhow::{bail, Context, Result};
use clap::{Arg, Command};
use models::{Config, Policy, StudentRecord};
use std::collections::HashMap;
use std::path::Path;

fn main() -> Result<()> {
    let matches = Command::new("house-allocator")
        .version("1.0")
        .about("Distributes students into houses balanced by gender, program and semester")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("policy")
                .long("policy")
                .value_name("NAME")
                .help("Override the configured policy (greedy-minimum or round-robin)"),
        )
        .get_matches();

    let config_file = matches.get_one::<String>("config").unwrap();

    // Load or create configuration
    let config = if Path::new(config_file).exists() {
        println!("📋 Loading configuration from: {}", config_file);
        Config::load_from_file(config_file)
            .with_context(|| format!("Failed to load configuration: {}", config_file))?
    } else {
        println!("📝 Creating default configuration file: {}", config_file);
        let default_config = Config::default();
        default_config.save_to_file(config_file)?;
        default_config
    };

    let policy = match matches.get_one::<String>("policy") {
        Some(name) => Policy::from_name(name)
            .ok_or_else(|| AllocationError::InvalidPolicy(name.clone()))?,
        None => config.policy,
    };

    let data_dir = config.data_directory.as_deref().unwrap_or("data");
    let output_file = config.output_file.as_deref().unwrap_or("students_with_houses.csv");

    // Configuration problems abort before any assignment
    let allocator = HouseAllocator::new(config.houses.clone(), policy)?;

    println!("🏠 Houses: {}", allocator.houses().join(", "));
    println!("⚖️  Policy: {}", allocator.policy().name());
    println!("📂 Reading CSV files from: {}", data_dir);

    let loader = loader::RecordLoader::new();
    let loaded = loader.load_directory(data_dir)?;

    if loaded.records.is_empty() {
        println!("❌ No student records found in {}", data_dir);
        return Ok(());
    }
    println!("👥 Loaded {} student records", loaded.records.len());

    let mut records = loaded.records;
    let report = allocator.allocate(&mut records)?;

    if !report.unassigned.is_empty() {
        println!("\n❌ {} record(s) could not be classified:", report.unassigned.len());
        for unassigned in &report.unassigned {
            for error in &unassigned.errors {
                println!("   {} ({})", error, unassigned.source_file);
            }
        }
        bail!("some students were not assigned houses");
    }

    write_output(&loaded.headers, &records, output_file)?;
    println!("✅ House assignment complete. File saved as {}", output_file);

    print_summary(&allocator, &records, &report);
    Ok(())
}

/// Write all records back out with the assigned House appended to the
/// original columns.
fn write_output(headers: &[String], records: &[StudentRecord], output_file: &str) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_file)
        .with_context(|| format!("Failed to create output file: {}", output_file))?;

    let mut header_row: Vec<&str> = headers.iter().map(String::as_str).collect();
    header_row.push("House");
    writer.write_record(&header_row)?;

    for record in records {
        let mut row: Vec<&str> = headers
            .iter()
            .map(|h| record.values.get(h).map(String::as_str).unwrap_or(""))
            .collect();
        row.push(record.house.as_deref().unwrap_or(""));
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

fn print_summary(allocator: &HouseAllocator, records: &[StudentRecord], report: &AllocationReport) {
    println!("\n📊 SUMMARY");
    println!("==========");
    println!("Assigned {} students across {} houses\n", report.assigned_count, allocator.houses().len());

    let mut overall: HashMap<&str, u64> = HashMap::new();
    let mut genders: Vec<&str> = Vec::new();
    for record in records {
        if let Some(house) = record.house.as_deref() {
            *overall.entry(house).or_default() += 1;
        }
        if let Some(gender) = record.gender.as_deref() {
            if !genders.contains(&gender) {
                genders.push(gender);
            }
        }
    }

    println!("🏠 House totals:");
    for house in allocator.houses() {
        println!("   {}: {}", house, overall.get(house.as_str()).unwrap_or(&0));
    }

    println!("\n👥 By gender:");
    for gender in genders {
        let counts: Vec<String> = allocator
            .houses()
            .iter()
            .enumerate()
            .map(|(i, house)| format!("{}={}", house, report.counters.gender_count(gender, i)))
            .collect();
        println!("   {}: {}", gender, counts.join(" "));
    }
}
