use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    summary_reconcile::example_apps::run_reconcile_demo(std::env::args().skip(1))
}
