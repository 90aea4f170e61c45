use std::process::ExitCode;

fn main() -> ExitCode {
    let Some(home) = dirs::home_dir() else {
        eprintln!("fabricsyncd: could not determine the home directory");
        return ExitCode::FAILURE;
    };
    match fabricsync_daemon::start_blocking(&home) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("fabricsyncd: {err}");
            ExitCode::FAILURE
        }
    }
}
