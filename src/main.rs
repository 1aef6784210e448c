fn main() {
    if let Err(err) = spending_model::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
