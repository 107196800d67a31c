fn main() {
    if let Err(err) = labstream_lib::run() {
        log::error!("labstream failed: {err:#}");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
