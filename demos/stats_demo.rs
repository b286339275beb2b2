use clap::Parser;
use probe_map::HashMap;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "target_capacity", default_value_t = 1000)]
    target_capacity: usize,

    /// Number of erase + insert rounds to run after the initial fill.
    #[arg(short = 'r', long = "churn_rounds", default_value_t = 10_000)]
    churn_rounds: usize,

    #[arg(short = 's', long = "seed", default_value_t = 0x5eed)]
    seed: u64,
}

fn main() {
    let args = Args::parse();

    println!(
        "Creating HashMap with target capacity: {}",
        args.target_capacity
    );

    let mut map: HashMap<u64, u64> = HashMap::with_capacity(args.target_capacity);
    let capacity = map.capacity();
    println!("Actual capacity: {}", capacity);

    // Stop just short of the 7/8 growth threshold.
    let fill = (capacity * 7 / 8).saturating_sub(1);
    println!("Filling map with {} u64 keys...", fill);

    let mut num_failures = 0;
    for key in 0..fill as u64 {
        match map.try_insert(key, key * 2) {
            Ok(outcome) => assert!(outcome.is_inserted(), "duplicate key {key}"),
            Err(_) => num_failures += 1,
        }
    }

    println!("Inserted {} values into map", map.len());
    println!(
        "Load factor after fill: {:.2}%",
        (map.len() as f64 / map.capacity() as f64) * 100.0
    );
    map.probe_histogram().print();
    map.debug_stats().print();

    println!();
    println!("Churning {} erase/insert rounds...", args.churn_rounds);

    let mut rng = SmallRng::seed_from_u64(args.seed);
    let mut live: Vec<u64> = (0..fill as u64).collect();
    let mut next_key = fill as u64;
    let mut max_tombstones = 0;
    for _ in 0..args.churn_rounds {
        if live.is_empty() {
            break;
        }

        let victim = live.swap_remove(rng.random_range(0..live.len()));
        assert!(map.erase(&victim));
        max_tombstones = max_tombstones.max(map.tombstones());

        if map.insert(next_key, next_key * 2).is_inserted() {
            live.push(next_key);
        }
        next_key += 1;
    }

    println!("Peak tombstones during churn: {}", max_tombstones);
    println!("Capacity after churn: {}", map.capacity());
    map.probe_histogram().print();
    map.debug_stats().print();
    println!(
        "Number of failed try_insert attempts: {} ({:.02}%)",
        num_failures,
        num_failures as f64 / fill.max(1) as f64 * 100.0
    );
}
