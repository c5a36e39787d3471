use std::process::ExitCode;

fn main() -> ExitCode {
    match epochmesh::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error[{}]: {}", e.kind(), e);
            ExitCode::FAILURE
        }
    }
}
