mod benchmark;

use benchmark::run_benchmarks;

fn main() {
    if let Err(e) = run_benchmarks() {
        eprintln!("benchmark failed: {}", e);
        std::process::exit(1);
    }
}
