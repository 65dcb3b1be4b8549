use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    vigil_cli::run()
}
