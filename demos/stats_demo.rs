use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;

use bag_hash::Config;
use bag_hash::HashTable;
use bag_hash::Probe;
use clap::Parser;

#[derive(Parser, Debug)]
struct Args {
    /// Number of values to insert.
    #[arg(short = 'n', long = "count", default_value_t = 100_000)]
    count: u64,

    /// Initial bucket count exponent.
    #[arg(short = 's', long = "size_log2", default_value_t = 10)]
    size_log2: u32,

    /// Fill percentage that triggers a resize.
    #[arg(short = 'f', long = "fill_percent", default_value_t = bag_hash::config::FILL_PERCENT)]
    fill_percent: u32,

    /// Remove every other value after filling.
    #[arg(short = 'r', long = "remove_half")]
    remove_half: bool,
}

fn hash_u64(value: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish().max(1)
}

fn main() {
    let args = Args::parse();

    let config = Config::new()
        .with_size_log2(args.size_log2)
        .with_fill_percent(args.fill_percent);
    let mut table: HashTable<u64> = match HashTable::try_with_config(config) {
        Ok(table) => table,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    println!(
        "Created HashTable with {} buckets, fill threshold {}%",
        table.bucket_count(),
        args.fill_percent
    );

    let mut duplicates = 0;
    for value in 0..args.count {
        if table.probe(hash_u64(value), value) == Probe::Exists {
            duplicates += 1;
        }
    }

    println!("Inserted {} values into table", table.len());
    println!("Hash collisions rejected as duplicates: {}", duplicates);

    if args.remove_half {
        let removed = (0..args.count)
            .step_by(2)
            .filter(|&value| table.remove(hash_u64(value)).is_some())
            .count();
        println!("Removed {} values", removed);
    }

    table.print_bag_histogram();
    table.debug_stats().print();
}
