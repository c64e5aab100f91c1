fn main() {
    if let Err(err) = person_service::app::run() {
        eprintln!("api startup failed: {err}");
        std::process::exit(1);
    }
}
