use cosim::cli::initialize_from_arguments;

#[tokio::main]
async fn main() {
    let code = initialize_from_arguments().await;
    std::process::exit(code);
}
