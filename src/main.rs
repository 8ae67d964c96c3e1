#[cfg(not(target_arch = "wasm32"))]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    motion_starter::backend::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {
    motion_starter::frontend::run();
}
