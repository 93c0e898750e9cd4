//! Thin control-RPC client for `hyprspace route show` (spec §6, §4.10),
//! grounded on `original_source/rpc/client.go`'s request/response round trip,
//! framed the same way as the server (`hyprspace_rpc::server`).

use futures_util::{SinkExt, StreamExt};
use hyprspace_rpc::{Request, Response};
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LinesCodec};

#[allow(clippy::print_stdout)]
pub async fn route_show(socket_path: &std::path::Path) -> anyhow::Result<()> {
    let stream = UnixStream::connect(socket_path).await?;
    let mut framed = Framed::new(stream, LinesCodec::new());

    framed.send(serde_json::to_string(&Request::RouteShow)?).await?;
    let line = framed
        .next()
        .await
        .ok_or_else(|| anyhow::anyhow!("rpc connection closed before a response arrived"))??;
    match serde_json::from_str::<Response>(&line)? {
        Response::Routes(routes) => {
            if routes.is_empty() {
                println!("no routes installed");
            }
            for route in routes {
                println!("{} via {}", route.net, route.peer);
            }
            Ok(())
        }
        Response::Err { message } => Err(anyhow::anyhow!("rpc error: {message}")),
        other => Err(anyhow::anyhow!("unexpected rpc response: {other:?}")),
    }
}
