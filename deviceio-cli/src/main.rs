use deviceio_cli::run_cli;
use deviceio_cli::util::shutdown::SHUTDOWN;

#[tokio::main]
async fn main() {
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            SHUTDOWN.cancel();
        }
    });

    let code = match run_cli().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };

    // the runtime would otherwise wait on a stdin read parked in the blocking pool
    std::process::exit(code);
}
