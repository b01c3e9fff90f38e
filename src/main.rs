fn main() {
    #[cfg(feature = "cli")]
    vcmerge::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("vcmerge: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
