#[tokio::main]
async fn main() {
    helper_board::start_server().await;
}
