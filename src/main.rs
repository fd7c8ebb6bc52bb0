fn main() {
    let exit_code = match m2::run::run() {
        Ok(code) => code,
        Err(err) => {
            println!("m2: error: {}", err);
            1
        }
    };
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}
