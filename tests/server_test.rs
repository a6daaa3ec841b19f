//! End-to-end tests over real sockets, driving the server with raw
//! request bytes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use plain_http::protocol::responses;
use plain_http::{error_handler_fn, handler, HttpError, Resolution, Response, Route, Server, ServerConfig};

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Writes the raw request, half-closes the sending side and collects the
/// server's bytes until it closes the connection.
async fn raw_exchange(server: &Server, request: &str) -> String {
    init_tracing();
    let handle = server.start(None).expect("server must start");
    let mut stream = TcpStream::connect(handle.local_addr()).await.expect("connect");

    stream.write_all(request.as_bytes()).await.expect("send request");
    stream.shutdown().await.expect("shutdown send side");

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.expect("read response");
    drop(stream);

    handle.stop().await;
    String::from_utf8_lossy(&response).into_owned()
}

fn contains_header(response: &str, name: &str, value: &str) -> bool {
    response
        .lines()
        .any(|line| match line.split_once(':') {
            Some((n, v)) => n.eq_ignore_ascii_case(name) && v.trim().eq_ignore_ascii_case(value),
            None => false,
        })
}

fn body_of(response: &str) -> &str {
    response.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or("")
}

#[tokio::test]
async fn greeting() {
    let route = Route::builder("/hello")
        .handler(
            plain_http::RequestHandler::builder(http::Method::GET)
                .produces(mime::TEXT_PLAIN)
                .apply(plain_http::handler_fn(|_request, _channel| async {
                    Ok(Some(responses::text("Hello World!")))
                })),
        )
        .build()
        .unwrap();
    let server = Server::builder().route(route).build().unwrap();

    let response = raw_exchange(&server, "GET /hello HTTP/1.1\r\nAccept: text/plain\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "got: {response}");
    assert!(contains_header(&response, "content-type", "text/plain; charset=utf-8"));
    assert!(contains_header(&response, "content-length", "12"));
    assert_eq!(body_of(&response), "Hello World!");
}

#[tokio::test]
async fn path_parameter() {
    let route = Route::builder("/hello/:name")
        .handler(handler::get(|request, _channel| async move {
            let name = request.param("name").unwrap_or_default().to_string();
            Ok(Some(responses::text(format!("Hello {name}!"))))
        }))
        .build()
        .unwrap();
    let server = Server::builder().route(route).build().unwrap();

    let response = raw_exchange(&server, "GET /hello/John HTTP/1.1\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "got: {response}");
    assert!(contains_header(&response, "content-length", "11"));
    assert_eq!(body_of(&response), "Hello John!");
}

#[tokio::test]
async fn percent_encoded_path_parameter() {
    let route = Route::builder("/u/:id")
        .handler(handler::get(|request, _channel| async move {
            let decoded = request.param("id").unwrap_or_default();
            let raw = request.param_raw("id").unwrap_or_default();
            Ok(Some(responses::text(format!("{decoded}|{raw}"))))
        }))
        .build()
        .unwrap();
    let server = Server::builder().route(route).build().unwrap();

    let response = raw_exchange(&server, "GET /u/John%20Doe HTTP/1.1\r\n\r\n").await;
    assert_eq!(body_of(&response), "John Doe|John%20Doe");
}

#[tokio::test]
async fn retry_on_error() {
    let invocations = Arc::new(AtomicUsize::new(0));

    let handler_invocations = invocations.clone();
    let route = Route::builder("/")
        .handler(handler::get(move |_request, _channel| {
            let n = handler_invocations.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 1 {
                    return Err(HttpError::internal("first attempt fails"));
                }
                let response = Response::builder(StatusCode::NO_CONTENT).header("N", n.to_string()).build()?;
                Ok(Some(response))
            }
        }))
        .build()
        .unwrap();

    let retry = error_handler_fn(|_error, channel, request, failed_handler| async move {
        let (Some(request), Some(failed_handler)) = (request, failed_handler) else {
            return Ok(Resolution::Declined);
        };
        match failed_handler.invoke(request, channel.clone()).await {
            Ok(Some(response)) => {
                channel.write(response).await?;
                Ok(Resolution::Handled)
            }
            Ok(None) => Ok(Resolution::Handled),
            Err(error) => Err(error),
        }
    });

    let server = Server::builder().route(route).error_handler(retry).build().unwrap();

    let response = raw_exchange(&server, "GET / HTTP/1.1\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 204 No Content\r\n"), "got: {response}");
    assert!(contains_header(&response, "n", "2"));
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn upgrade_required_for_http_0_9() {
    let route = Route::builder("/")
        .handler(handler::get(|_request, _channel| async { Ok(Some(responses::ok())) }))
        .build()
        .unwrap();
    let server = Server::builder().route(route).build().unwrap();

    let response = raw_exchange(&server, "GET / HTTP/0.9\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 426 Upgrade Required\r\n"), "got: {response}");
    assert!(contains_header(&response, "upgrade", "HTTP/1.1"));
    assert!(contains_header(&response, "connection", "close"));
    assert_eq!(body_of(&response), "");
}

#[tokio::test]
async fn head_too_large() {
    let route = Route::builder("/")
        .handler(handler::get(|_request, _channel| async { Ok(Some(responses::ok())) }))
        .build()
        .unwrap();
    let config = ServerConfig::builder().max_request_head_size(1).build();
    let server = Server::builder().config(config).route(route).build().unwrap();

    let response = raw_exchange(&server, "AB").await;

    assert!(response.starts_with("HTTP/1.1 413 Entity Too Large\r\n"), "got: {response}");
    assert!(contains_header(&response, "connection", "close"));
}

#[tokio::test]
async fn interim_responses_precede_the_final_one() {
    let route = Route::builder("/")
        .handler(handler::get(|_request, channel| async move {
            channel.write(responses::processing()).await?;
            channel.write(responses::processing()).await?;
            Ok(Some(responses::text("Done!")))
        }))
        .build()
        .unwrap();
    let server = Server::builder().route(route).build().unwrap();

    let response = raw_exchange(&server, "GET / HTTP/1.1\r\n\r\n").await;

    let first = response.find("HTTP/1.1 102 Processing\r\n\r\n").expect("first interim");
    let second = response.rfind("HTTP/1.1 102 Processing\r\n\r\n").expect("second interim");
    let final_head = response.find("HTTP/1.1 200 OK\r\n").expect("final response");
    assert!(first < second, "got: {response}");
    assert!(second < final_head, "got: {response}");
    assert!(response.ends_with("Done!"), "got: {response}");
}

#[tokio::test]
async fn request_body_is_delivered_on_demand() {
    let route = Route::builder("/echo")
        .handler(handler::post(|request, _channel| async move {
            let body = request.take_body().expect("first subscriber gets the body");
            let bytes = body.bytes().await?;
            Ok(Some(responses::text(String::from_utf8_lossy(&bytes).into_owned())))
        }))
        .build()
        .unwrap();
    let server = Server::builder().route(route).build().unwrap();

    let response = raw_exchange(
        &server,
        "POST /echo HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello world",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "got: {response}");
    assert_eq!(body_of(&response), "hello world");
}

#[tokio::test]
async fn expect_continue_is_answered_when_the_body_is_read() {
    let route = Route::builder("/upload")
        .handler(handler::post(|request, _channel| async move {
            let bytes = request.take_body().expect("body").bytes().await?;
            Ok(Some(responses::text(format!("got {} bytes", bytes.len()))))
        }))
        .build()
        .unwrap();
    let server = Server::builder().route(route).build().unwrap();

    let response = raw_exchange(
        &server,
        "POST /upload HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\nhi",
    )
    .await;

    let interim = response.find("HTTP/1.1 100 Continue\r\n\r\n").expect("continue interim");
    let final_head = response.find("HTTP/1.1 200 OK\r\n").expect("final response");
    assert!(interim < final_head, "got: {response}");
    assert_eq!(body_of(&response[final_head..]), "got 2 bytes");
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let route = Route::builder("/known")
        .handler(handler::get(|_request, _channel| async { Ok(Some(responses::ok())) }))
        .build()
        .unwrap();
    let server = Server::builder().route(route).build().unwrap();

    let response = raw_exchange(&server, "GET /unknown HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "got: {response}");
}

#[tokio::test]
async fn unregistered_method_is_not_implemented() {
    let route = Route::builder("/thing")
        .handler(handler::get(|_request, _channel| async { Ok(Some(responses::ok())) }))
        .build()
        .unwrap();
    let server = Server::builder().route(route).build().unwrap();

    let response = raw_exchange(&server, "DELETE /thing HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 501 Not Implemented\r\n"), "got: {response}");
}

#[tokio::test]
async fn trace_with_a_body_is_a_client_fault() {
    let route = Route::builder("/")
        .handler(handler::get(|_request, _channel| async { Ok(Some(responses::ok())) }))
        .build()
        .unwrap();
    let server = Server::builder().route(route).build().unwrap();

    let response =
        raw_exchange(&server, "TRACE / HTTP/1.1\r\nContent-Length: 2\r\n\r\nhi").await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "got: {response}");
}

#[tokio::test]
async fn malformed_head_is_a_bad_request() {
    let route = Route::builder("/")
        .handler(handler::get(|_request, _channel| async { Ok(Some(responses::ok())) }))
        .build()
        .unwrap();
    let server = Server::builder().route(route).build().unwrap();

    let response = raw_exchange(&server, "NOT A REQUEST LINE AT ALL\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "got: {response}");
}

#[tokio::test]
async fn http_1_0_gets_served_but_not_kept_alive() {
    let route = Route::builder("/")
        .handler(handler::get(|_request, _channel| async { Ok(Some(responses::text("old school"))) }))
        .build()
        .unwrap();
    let server = Server::builder().route(route).build().unwrap();
    let handle = server.start(None).unwrap();

    // no shutdown of the send side: the server must close on its own
    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    stream.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response);

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "got: {response}");
    assert_eq!(body_of(&response), "old school");

    handle.stop().await;
}

#[tokio::test]
async fn rejecting_http_1_0_upgrades() {
    let route = Route::builder("/")
        .handler(handler::get(|_request, _channel| async { Ok(Some(responses::ok())) }))
        .build()
        .unwrap();
    let config = ServerConfig::builder().reject_http_1_0(true).build();
    let server = Server::builder().config(config).route(route).build().unwrap();

    let response = raw_exchange(&server, "GET / HTTP/1.0\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 426 Upgrade Required\r\n"), "got: {response}");
    assert!(contains_header(&response, "connection", "close"));
}

#[tokio::test]
async fn persistent_connection_serves_pipelined_exchanges() {
    let counter = Arc::new(AtomicUsize::new(0));
    let handler_counter = counter.clone();
    let route = Route::builder("/count")
        .handler(handler::get(move |_request, _channel| {
            let n = handler_counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(Some(responses::text(format!("#{n}")))) }
        }))
        .build()
        .unwrap();
    let server = Server::builder().route(route).build().unwrap();

    let response = raw_exchange(
        &server,
        "GET /count HTTP/1.1\r\n\r\nGET /count HTTP/1.1\r\n\r\n",
    )
    .await;

    let first = response.find("#1").expect("first exchange");
    let second = response.find("#2").expect("second exchange");
    assert!(first < second, "got: {response}");
    assert_eq!(response.matches("HTTP/1.1 200 OK\r\n").count(), 2);
}

#[tokio::test]
async fn connection_close_is_honoured() {
    let route = Route::builder("/")
        .handler(handler::get(|_request, _channel| async { Ok(Some(responses::ok())) }))
        .build()
        .unwrap();
    let server = Server::builder().route(route).build().unwrap();
    let handle = server.start(None).unwrap();

    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await.unwrap();
    let mut response = Vec::new();
    // the server closes without the client half-closing first
    stream.read_to_end(&mut response).await.unwrap();
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 200 OK\r\n"));

    handle.stop().await;
}

#[tokio::test]
async fn stop_now_aborts_in_flight_exchanges() {
    let route = Route::builder("/slow")
        .handler(handler::get(|_request, _channel| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Some(responses::ok()))
        }))
        .build()
        .unwrap();
    let server = Server::builder().route(route).build().unwrap();
    let handle = server.start(None).unwrap();

    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    stream.write_all(b"GET /slow HTTP/1.1\r\n\r\n").await.unwrap();
    // give the exchange a moment to reach the handler
    tokio::time::sleep(Duration::from_millis(100)).await;

    handle.stop_now().await;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    assert!(response.is_empty(), "aborted exchange must not produce a response");
}

#[tokio::test]
async fn errors_behind_the_chain_still_get_the_default_translation() {
    let route = Route::builder("/")
        .handler(handler::get(|_request, _channel| async {
            Err(HttpError::internal("boom"))
        }))
        .build()
        .unwrap();

    // a handler that opts out of everything
    let decliner =
        error_handler_fn(|_error, _channel, _request, _handler| async { Ok(Resolution::Declined) });

    let server = Server::builder().route(route).error_handler(decliner).build().unwrap();

    let response = raw_exchange(&server, "GET / HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"), "got: {response}");
}

#[tokio::test]
async fn idle_head_read_times_out_with_408() {
    let route = Route::builder("/")
        .handler(handler::get(|_request, _channel| async { Ok(Some(responses::ok())) }))
        .build()
        .unwrap();
    let config = ServerConfig::builder().head_timeout(Duration::from_millis(100)).build();
    let server = Server::builder().config(config).route(route).build().unwrap();
    let handle = server.start(None).unwrap();

    // connect and send nothing
    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response);

    assert!(response.starts_with("HTTP/1.1 408 Request Timeout\r\n"), "got: {response}");
    assert!(contains_header(&response, "connection", "close"));

    handle.stop().await;
}

#[tokio::test]
async fn a_handler_that_never_responds_times_out_with_503() {
    let route = Route::builder("/")
        .handler(handler::get(|_request, _channel| async {
            // neither writes nor returns a response
            Ok(None)
        }))
        .build()
        .unwrap();
    let config = ServerConfig::builder().response_timeout(Duration::from_millis(100)).build();
    let server = Server::builder().config(config).route(route).build().unwrap();

    let response = raw_exchange(&server, "GET / HTTP/1.1\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"), "got: {response}");
    assert!(contains_header(&response, "connection", "close"));
}

#[tokio::test]
async fn attempts_beyond_the_cap_fall_through_to_the_default() {
    let chain_calls = Arc::new(AtomicUsize::new(0));

    let counting = chain_calls.clone();
    let churn = error_handler_fn(move |error, _channel, _request, _handler| {
        let calls = counting.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            // always raise a fresh error, restarting the cycle
            Err(HttpError::internal(format!("churn {calls} after {error}")))
        }
    });

    let route = Route::builder("/")
        .handler(handler::get(|_request, _channel| async {
            Err(HttpError::internal("first failure"))
        }))
        .build()
        .unwrap();

    let config = ServerConfig::builder().max_error_recovery_attempts(3).build();
    let server = Server::builder().config(config).route(route).error_handler(churn).build().unwrap();

    let response = raw_exchange(&server, "GET / HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"), "got: {response}");
    assert_eq!(chain_calls.load(Ordering::SeqCst), 3);
}
