use std::process::ExitCode;

fn main() -> ExitCode {
    match panelsmith_lib::run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
