/// WebSocket gateway tests over a real listener
use futures::{SinkExt, StreamExt};
use maystorfix::{
    config::ServerConfig, context::AppContext, db::models::UserRole, server::build_router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tempfile::TempDir;
use tokio::{net::TcpStream, time::Duration};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "0123456789abcdef0123456789abcdef";
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    ctx: AppContext,
    addr: SocketAddr,
    customer_token: String,
    provider_token: String,
    conversation_id: String,
    _dir: TempDir,
}

async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::for_directory(dir.path().to_path_buf(), SECRET);
    let ctx = AppContext::new(config).await.unwrap();

    let customer = ctx
        .account_manager
        .register("Мария", "0888200200", "password123", UserRole::Customer)
        .await
        .unwrap();
    let provider = ctx
        .account_manager
        .register("Георги ВиК", "0888100100", "password123", UserRole::Provider)
        .await
        .unwrap();
    let customer_token = ctx.account_manager.create_session(&customer.id).await.unwrap().access_token;
    let provider_token = ctx.account_manager.create_session(&provider.id).await.unwrap().access_token;

    let identifier = ctx.identifiers.register(&provider.id).await.unwrap();
    let token = ctx.chat_tokens.issue(&identifier.identifier).await.unwrap();
    let redemption = ctx.chat_tokens.redeem(&token.token, &customer.id).await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(ctx.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        ctx,
        addr,
        customer_token,
        provider_token,
        conversation_id: redemption.conversation.id,
        _dir: dir,
    }
}

async fn send(socket: &mut Socket, frame: Value) {
    socket.send(Message::Text(frame.to_string())).await.unwrap();
}

/// Read frames until a server event with this name arrives
async fn next_event(socket: &mut Socket, name: &str) -> Value {
    tokio::time::timeout(FRAME_TIMEOUT, async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    if frame["event"] == name {
                        return frame["data"].clone();
                    }
                }
                Some(Ok(Message::Close(_))) | None => panic!("socket closed waiting for {}", name),
                Some(Ok(_)) => {}
                Some(Err(e)) => panic!("socket error waiting for {}: {}", name, e),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", name))
}

#[tokio::test]
async fn test_upgrade_without_credential_is_unauthorized() {
    let server = start_server().await;

    for url in [
        format!("ws://{}/ws", server.addr),
        format!("ws://{}/ws?token=garbage", server.addr),
    ] {
        match connect_async(url).await {
            Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
            Err(other) => panic!("unexpected handshake error: {}", other),
            Ok(_) => panic!("upgrade should have been refused"),
        }
    }
    assert_eq!(server.ctx.registry.stats().await.sockets, 0);
}

#[tokio::test]
async fn test_socket_round_trip_and_shutdown() {
    let server = start_server().await;

    let (mut customer, _) = connect_async(format!(
        "ws://{}/ws?token={}",
        server.addr, server.customer_token
    ))
    .await
    .unwrap();

    let mut request = format!("ws://{}/ws", server.addr).into_client_request().unwrap();
    request.headers_mut().insert(
        "authorization",
        format!("Bearer {}", server.provider_token).parse().unwrap(),
    );
    let (mut provider, _) = connect_async(request).await.unwrap();

    // Sockets register right after the handshake completes
    tokio::time::timeout(FRAME_TIMEOUT, async {
        while server.ctx.registry.stats().await.sockets < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // Malformed frames are ignored and the socket stays usable
    customer.send(Message::Text("not json".to_string())).await.unwrap();

    send(
        &mut customer,
        json!({ "event": "join-conversation", "data": { "conversationId": server.conversation_id } }),
    )
    .await;
    send(
        &mut customer,
        json!({
            "event": "message:send",
            "data": { "conversationId": server.conversation_id, "body": "Здравейте" }
        }),
    )
    .await;

    let delivered = next_event(&mut customer, "message:new").await;
    assert_eq!(delivered["conversationId"], server.conversation_id.as_str());
    assert_eq!(delivered["message"]["body"], "Здравейте");

    // Provider is connected but not in the room
    let notified = next_event(&mut provider, "new_message_notification").await;
    assert_eq!(notified["conversationId"], server.conversation_id.as_str());
    assert_eq!(notified["messageId"], delivered["message"]["id"]);

    assert_eq!(server.ctx.registry.shutdown().await, 2);

    let closed = tokio::time::timeout(FRAME_TIMEOUT, async {
        loop {
            match customer.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "socket stayed open after shutdown");
}
