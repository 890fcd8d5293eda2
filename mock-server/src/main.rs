use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let addr = std::env::var("MOCK_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    let listener = TcpListener::bind(&addr).await?;
    println!("mock server on http://{}", listener.local_addr()?);
    println!("routes: /hello /echo /cookies /status/{{code}} /slow/{{ms}} /bytes/{{len}}");
    mock_server::run(listener).await
}
