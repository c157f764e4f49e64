fn main() {
    if let Err(e) = pos_bridge_lib::run() {
        eprintln!("pos-bridge: {e:#}");
        std::process::exit(1);
    }
}
