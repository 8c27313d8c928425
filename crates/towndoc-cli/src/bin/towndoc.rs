fn main() {
    let code = towndoc_cli::run_from_env();
    std::process::exit(code);
}
