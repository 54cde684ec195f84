//! End-to-end scenarios over a real `Server` + TCP loopback, as opposed to
//! the in-process `#[cfg(test)]` coverage inside each module that drives
//! the exchange state machine directly over an in-memory channel.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use exchange_http::{Config, Method, Request, Response, Server, StatusCode};
use mime::Mime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use exchange_http::media::MediaSpec;

async fn start() -> Server {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Server::start(addr, Config::default()).await.unwrap()
}

async fn send(server: &Server, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn hello_world() {
    let server = start().await;
    let route = server.add("/hello").await.unwrap();
    server
        .add_handler(
            route,
            Method::get(),
            MediaSpec::NothingAndAll,
            Mime::from_str("text/plain").unwrap(),
            exchange_http::route::sync_handler(|_: &Request| Response::builder(StatusCode::OK).text("Hello World!").build()),
        )
        .await
        .unwrap();

    let text = send(&server, b"GET /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(text.contains("Content-Length: 12"));
    assert!(text.ends_with("Hello World!"));

    server.kill().await;
}

struct NameHandler;

#[async_trait::async_trait]
impl exchange_http::route::Handler for NameHandler {
    async fn call(&self, req: &Request, declared: &[String], _cx: &mut exchange_http::ExchangeCx<'_>) -> Option<Response> {
        let name = req.path_params(declared).decoded("name").unwrap().to_string();
        Some(Response::builder(StatusCode::OK).text(format!("Hello {name}!")).build())
    }
}

#[tokio::test]
async fn path_param_is_interpolated_into_the_body() {
    let server = start().await;
    let route = server.add("/hello/:name").await.unwrap();
    server
        .add_handler(route, Method::get(), MediaSpec::NothingAndAll, Mime::from_str("text/plain").unwrap(), Arc::new(NameHandler))
        .await
        .unwrap();

    let text = send(&server, b"GET /hello/John HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
    assert!(text.contains("Content-Length: 11"));
    assert!(text.ends_with("Hello John!"));

    server.kill().await;
}

#[tokio::test]
async fn accept_header_picks_json_over_plain_and_q_zero_eliminates_plain() {
    let server = start().await;
    let route = server.add("/g").await.unwrap();
    server
        .add_handler(
            route,
            Method::get(),
            MediaSpec::NothingAndAll,
            Mime::from_str("text/plain").unwrap(),
            exchange_http::route::sync_handler(|_: &Request| Response::builder(StatusCode::OK).text("plain").build()),
        )
        .await
        .unwrap();
    server
        .add_handler(
            route,
            Method::get(),
            MediaSpec::NothingAndAll,
            Mime::from_str("application/json").unwrap(),
            exchange_http::route::sync_handler(|_: &Request| Response::builder(StatusCode::OK).text("{}").build()),
        )
        .await
        .unwrap();

    let json = send(
        &server,
        b"GET /g HTTP/1.1\r\nHost: x\r\nAccept: application/json\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(json.contains("Content-Type: application/json"));

    let plain = send(&server, b"GET /g HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
    assert!(plain.contains("Content-Type: text/plain"));

    let json_again = send(
        &server,
        b"GET /g HTTP/1.1\r\nHost: x\r\nAccept: */*;q=0.5, text/*;q=0\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(json_again.contains("Content-Type: application/json"));

    server.kill().await;
}

#[tokio::test]
async fn options_on_a_get_only_route_reports_the_allow_header() {
    let server = start().await;
    let route = server.add("/x").await.unwrap();
    server
        .add_handler(
            route,
            Method::get(),
            MediaSpec::NothingAndAll,
            Mime::from_str("text/plain").unwrap(),
            exchange_http::route::sync_handler(|_: &Request| Response::builder(StatusCode::OK).build()),
        )
        .await
        .unwrap();

    let text = send(&server, b"OPTIONS /x HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
    assert!(text.starts_with("HTTP/1.1 204 No Content"));
    assert!(text.contains("Allow: OPTIONS, GET"));

    server.kill().await;
}
