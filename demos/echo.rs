//! Echo demo: a client and a server connection over an in-memory stream.
//!
//! The server collects each message from its chunks and echoes it back.
//! The client sends a few messages, prints the echoes, and
//! closes the connection.
//!
//! Run with `cargo run --example echo`.

use bytes::Bytes;
use ws_engine::{CloseCode, Connection, ConnectionBuilder, ControlFrame, Result};

async fn serve(mut conn: Connection) -> Result<()> {
    let mut message = Vec::new();
    while let Some(chunk) = conn.read_message().await? {
        message.extend_from_slice(&chunk.data);
        if chunk.completes_message() {
            let payload = Bytes::from(std::mem::take(&mut message));
            conn.write_message(payload, chunk.is_binary)?.await?;
        }
    }
    println!("server: connection closed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);

    let server = ConnectionBuilder::server()
        .on_control(|frame| {
            if let ControlFrame::Close(close) = frame {
                println!("server: peer closed with {:?}", close.code);
            }
        })
        .on_close(|| println!("server: close hook"))
        .start(server_io)?;
    let server_task = tokio::spawn(serve(server));

    let mut client = ConnectionBuilder::client()
        .on_close(|| println!("client: close hook"))
        .start(client_io)?;

    for text in ["hello", "frame engine", "goodbye"] {
        client.write_message(Bytes::from(text), false)?.await?;

        let mut echoed = Vec::new();
        while let Some(chunk) = client.read_message().await? {
            echoed.extend_from_slice(&chunk.data);
            if chunk.completes_message() {
                break;
            }
        }
        println!("client: {}", String::from_utf8_lossy(&echoed));
    }

    client.close(CloseCode::NORMAL, "done")?.await?;
    while client.read_message().await?.is_some() {}

    if let Ok(result) = server_task.await {
        result?;
    }
    Ok(())
}
