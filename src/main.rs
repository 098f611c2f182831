fn main() {
    if let Err(e) = trackgate_lib::run() {
        eprintln!("trackgate: {e:#}");
        std::process::exit(1);
    }
}
