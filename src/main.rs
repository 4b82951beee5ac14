fn main() {
    if let Err(e) = turbopad_lib::run() {
        log::error!("turbopad failed: {}", e);
        eprintln!("turbopad: {}", e);
        std::process::exit(1);
    }
}
