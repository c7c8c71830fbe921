#![allow(clippy::unwrap_used)]

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use hdbus_client::Requester;
use hdbus_core::protocol::stream::write_frame;
use hdbus_core::Encoding;
use hdbus_server::config;
use hdbus_server::transport::TcpRouter;
use hdbus_server::{AppState, DispatchServer};

const BOARD: &str = r#"
version: 1
server:
  listen: "127.0.0.1:0"
registry:
  address_pool: ["0X01", "0X02", "0X03"]
devices:
  - { alias: LED_BLUE, kind: led, pin: 17 }
  - { alias: TEMP, kind: temperature }
  - { alias: POWER, kind: power, config: "5" }
groups:
  - { alias: LED_ALL, tag: led }
"#;

async fn spawn_server() -> (AppState, std::net::SocketAddr, oneshot::Sender<()>) {
    let state = AppState::new(config::load_from_str(BOARD).unwrap()).unwrap();
    let listen = state.cfg().server.listen_addr().unwrap();
    let transport = TcpRouter::bind(listen, state.cfg().server.max_frame_bytes, state.metrics())
        .await
        .unwrap();
    let addr = transport.local_addr();

    let mut server = DispatchServer::new(
        transport,
        state.dispatcher(),
        state.metrics(),
        &state.cfg().server,
    );
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        server
            .run_until(async {
                let _ = stop_rx.await;
            })
            .await;
    });
    (state, addr, stop_tx)
}

#[tokio::test]
async fn requester_round_trips_over_tcp() {
    let (state, addr, stop) = spawn_server().await;
    let mut client = Requester::with_identity(addr, "Client 42", Encoding::Cbor)
        .await
        .unwrap();

    let reply = client.status("LED_ALL").await.unwrap();
    assert!(reply.text().starts_with("Processed Request from Client 42\n: "));
    assert_eq!(reply.lines(), ["Status of LED_BLUE at address 0X01 is: OFF."]);

    let reply = client.config("LED_BLUE", "ON").await.unwrap();
    assert_eq!(reply.body(), "Set LED_BLUE at 0X01 to: ON.\n");

    let reply = client.config("POWER", "3.3").await.unwrap();
    assert_eq!(reply.body(), "Set POWER at 0X03 to: 3.3V.\n");

    let reply = client.status("FAN").await.unwrap();
    assert_eq!(reply.body(), "No such device: FAN.\n");

    let reply = client
        .start_process("LED_BLUE", "BLINK", Some(30.0), Some(0.05))
        .await
        .unwrap();
    assert_eq!(reply.body(), "Started BLINK process on LED_BLUE at address 0X01.\n");
    let reply = client.stop_process("LED_BLUE", "BLINK").await.unwrap();
    assert_eq!(reply.body(), "Stopped BLINK process on LED_BLUE at address 0X01.\n");

    state.supervisor().join("LED_BLUE", "BLINK").await;
    let reply = client.status("LED_BLUE").await.unwrap();
    assert_eq!(reply.body(), "Status of LED_BLUE at address 0X01 is: OFF.\n");

    let _ = stop.send(());
}

#[tokio::test]
async fn garbage_is_dropped_and_connection_keeps_serving() {
    let (state, addr, stop) = spawn_server().await;

    // Undecodable request under the default drop policy: no reply.
    let mut raw = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut raw, &[Bytes::from_static(b"Client 5")]).await.unwrap();
    write_frame(&mut raw, &[Bytes::new(), Bytes::from_static(b"\x00\x01")])
        .await
        .unwrap();

    let mut client = Requester::with_identity(addr, "Client 6", Encoding::Cbor)
        .await
        .unwrap();
    let reply = client.read("TEMP").await.unwrap();
    assert!(reply.body().starts_with("Value of TEMP at address 0X02 is: "));

    while state.metrics().decode_errors.get(&[("encoding", "CBOR")]) == 0 {
        tokio::task::yield_now().await;
    }
    let _ = stop.send(());
}
