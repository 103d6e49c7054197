//! End-to-end bombardments against local fixture servers.
//!
//! The fixtures speak raw HTTP/1.1 over a `TcpListener` so they can emit
//! exactly the bytes each scenario needs, including status codes a real
//! server framework would refuse (601, 701).

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use barrage::{
    Barrage, Config, DynamicCall, DynamicFactory, FactorySource, RequestFactory, TerminationSpec,
    report,
};

struct Fixture {
    addr: SocketAddr,
    hits: Arc<AtomicU64>,
    request_lines: Arc<Mutex<Vec<String>>>,
    header_lines: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Fixture {
    fn url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.addr)).unwrap()
    }
}

fn ok_response(body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

fn status_response(status: u16) -> Vec<u8> {
    if status == 101 {
        // 101 is only final as an upgrade; it carries no content framing.
        b"HTTP/1.1 101 Switching Protocols\r\nConnection: upgrade\r\nUpgrade: test\r\n\r\n".to_vec()
    } else {
        format!("HTTP/1.1 {status} Test\r\nContent-Length: 0\r\nConnection: keep-alive\r\n\r\n")
            .into_bytes()
    }
}

/// Serves connections forever; each request is answered with `respond(n)`
/// where `n` is the global request index, after an optional delay.
async fn spawn_fixture<F>(respond: F, delay: Duration) -> Fixture
where
    F: Fn(u64) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let fixture = Fixture {
        addr,
        hits: Arc::new(AtomicU64::new(0)),
        request_lines: Arc::new(Mutex::new(Vec::new())),
        header_lines: Arc::new(Mutex::new(Vec::new())),
        bodies: Arc::new(Mutex::new(Vec::new())),
    };

    let hits = Arc::clone(&fixture.hits);
    let request_lines = Arc::clone(&fixture.request_lines);
    let header_lines = Arc::clone(&fixture.header_lines);
    let bodies = Arc::clone(&fixture.bodies);
    let respond: Arc<dyn Fn(u64) -> Vec<u8> + Send + Sync> = Arc::new(respond);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(serve_connection(
                stream,
                Arc::clone(&hits),
                Arc::clone(&request_lines),
                Arc::clone(&header_lines),
                Arc::clone(&bodies),
                Arc::clone(&respond),
                delay,
            ));
        }
    });

    fixture
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// One complete request from the front of `buf`: the head, the decoded body,
/// and how many bytes to consume. `None` until enough bytes have arrived.
fn parse_request(buf: &[u8]) -> Option<(String, Vec<u8>, usize)> {
    let head_end = find_head_end(buf)?;
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();

    let mut content_length = 0usize;
    let mut chunked = false;
    for line in head.lines().skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            } else if name.eq_ignore_ascii_case("transfer-encoding")
                && value.trim().eq_ignore_ascii_case("chunked")
            {
                chunked = true;
            }
        }
    }

    let body_start = head_end + 4;
    if chunked {
        let (body, consumed) = parse_chunked(&buf[body_start..])?;
        Some((head, body, body_start + consumed))
    } else {
        if buf.len() < body_start + content_length {
            return None;
        }
        let body = buf[body_start..body_start + content_length].to_vec();
        Some((head, body, body_start + content_length))
    }
}

fn parse_chunked(buf: &[u8]) -> Option<(Vec<u8>, usize)> {
    let mut body = Vec::new();
    let mut pos = 0;
    loop {
        let line_end = buf[pos..].windows(2).position(|w| w == b"\r\n")? + pos;
        let size = usize::from_str_radix(std::str::from_utf8(&buf[pos..line_end]).ok()?.trim(), 16)
            .ok()?;
        let data_start = line_end + 2;
        if size == 0 {
            if buf.len() < data_start + 2 {
                return None;
            }
            return Some((body, data_start + 2));
        }
        if buf.len() < data_start + size + 2 {
            return None;
        }
        body.extend_from_slice(&buf[data_start..data_start + size]);
        pos = data_start + size + 2;
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    hits: Arc<AtomicU64>,
    request_lines: Arc<Mutex<Vec<String>>>,
    header_lines: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<Vec<u8>>>>,
    respond: Arc<dyn Fn(u64) -> Vec<u8> + Send + Sync>,
    delay: Duration,
) {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        while let Some((head, body, consumed)) = parse_request(&buf) {
            buf.drain(..consumed);

            let mut lines = head.lines();
            if let Some(request_line) = lines.next() {
                request_lines.lock().push(request_line.to_string());
            }
            header_lines
                .lock()
                .extend(lines.map(|line| line.to_string()));
            bodies.lock().push(body);

            let n = hits.fetch_add(1, Ordering::SeqCst);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if stream.write_all(&respond(n)).await.is_err() {
                return;
            }
        }

        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn config(url: Url, termination: TerminationSpec) -> Config {
    Config::builder()
        .url(url)
        .termination(termination)
        .connections(10)
        .build()
}

#[tokio::test(flavor = "multi_thread")]
async fn fires_the_specified_number_of_requests() {
    let fixture = spawn_fixture(|_| ok_response(b""), Duration::ZERO).await;
    let mut engine = Barrage::new(config(fixture.url(), TerminationSpec::Counted(100))).unwrap();

    engine.bombard().await;

    assert_eq!(fixture.hits.load(Ordering::SeqCst), 100);
    assert_eq!(engine.status_count(2), 100);
    for class in [1, 3, 4, 5, 0] {
        assert_eq!(engine.status_count(class), 0, "class {class}");
    }
    assert_eq!(engine.error_sum(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn timed_bombardment_finishes_on_time() {
    let fixture = spawn_fixture(|_| ok_response(b""), Duration::ZERO).await;
    let mut engine = Barrage::new(config(
        fixture.url(),
        TerminationSpec::Timed(Duration::from_secs(1)),
    ))
    .unwrap();

    tokio::time::timeout(Duration::from_secs(6), engine.bombard())
        .await
        .expect("bombardment must finish shortly after the deadline");

    assert!(engine.status_count(2) >= 1);
    let elapsed = engine.time_taken().as_secs_f64();
    assert!((0.95..=1.5).contains(&elapsed), "elapsed {elapsed}");
}

#[tokio::test(flavor = "multi_thread")]
async fn sends_every_configured_header() {
    let fixture = spawn_fixture(|_| ok_response(b""), Duration::ZERO).await;
    let mut cfg = config(fixture.url(), TerminationSpec::Counted(10));
    cfg.headers = vec![
        ("header1".parse().unwrap(), "Value1".parse().unwrap()),
        ("header-two".parse().unwrap(), "value-two".parse().unwrap()),
        ("x-dup".parse().unwrap(), "a".parse().unwrap()),
        ("x-dup".parse().unwrap(), "b".parse().unwrap()),
    ];
    let mut engine = Barrage::new(cfg).unwrap();

    engine.bombard().await;

    let seen = fixture.header_lines.lock();
    let count = |needle: &str| {
        seen.iter()
            .filter(|line| line.to_ascii_lowercase().replace(' ', "") == needle)
            .count()
    };
    assert_eq!(count("header1:value1"), 10);
    assert_eq!(count("header-two:value-two"), 10);
    assert_eq!(count("x-dup:a"), 10);
    assert_eq!(count("x-dup:b"), 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn records_status_codes_into_the_right_buckets() {
    const CODES: [u16; 7] = [101, 201, 301, 401, 501, 601, 701];
    let fixture =
        spawn_fixture(|n| status_response(CODES[(n % 7) as usize]), Duration::ZERO).await;
    let mut engine = Barrage::new(config(fixture.url(), TerminationSpec::Counted(70))).unwrap();

    engine.bombard().await;

    for class in 1..=5 {
        assert_eq!(engine.status_count(class), 10, "class {class}xx");
    }
    assert_eq!(engine.status_count(0), 20);
}

#[tokio::test(flavor = "multi_thread")]
async fn requests_exceeding_the_timeout_are_counted_as_errors() {
    let timeout = Duration::from_millis(100);
    let fixture = spawn_fixture(|_| ok_response(b""), timeout * 2).await;
    let mut cfg = config(fixture.url(), TerminationSpec::Counted(10));
    cfg.timeout = timeout;
    let mut engine = Barrage::new(cfg).unwrap();

    engine.bombard().await;

    assert_eq!(engine.error_sum(), 10);
    assert_eq!(engine.status_count(0), 10);
    for class in 1..=5 {
        assert_eq!(engine.status_count(class), 0);
    }
    let summary = engine.summary();
    assert_eq!(summary.errors[0], ("timeout".to_owned(), 10));
}

#[tokio::test(flavor = "multi_thread")]
async fn accounts_for_every_response_byte() {
    let body = vec![b'a'; 1024];
    let fixture = spawn_fixture(move |_| ok_response(&body), Duration::ZERO).await;
    let mut cfg = config(fixture.url(), TerminationSpec::Counted(10));
    cfg.connections = 5;
    let mut engine = Barrage::new(cfg).unwrap();

    engine.bombard().await;

    assert_eq!(engine.bytes_read(), 10 * 1024);
    assert!(engine.bytes_written() > 0);

    let summary = engine.summary();
    let expected = (engine.bytes_read() + engine.bytes_written()) as f64
        / engine.time_taken().as_secs_f64();
    assert!((summary.throughput() - expected).abs() < 1e-9);
}

#[tokio::test]
async fn unreadable_client_cert_fails_startup() {
    let mut cfg = config(
        Url::parse("https://localhost/").unwrap(),
        TerminationSpec::Counted(10),
    );
    cfg.cert_path = Some("/no/such/cert.pem".into());

    let err = Barrage::new(cfg).expect_err("startup must fail");
    assert!(
        format!("{err:#}").contains("failed to read client certificate file"),
        "unexpected error: {err:#}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_ends_a_timed_bombardment_early() {
    let fixture = spawn_fixture(|_| ok_response(b""), Duration::ZERO).await;
    let mut engine = Barrage::new(config(
        fixture.url(),
        TerminationSpec::Timed(Duration::from_secs(30)),
    ))
    .unwrap();

    let barrier = engine.barrier();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        barrier.cancel();
    });

    tokio::time::timeout(Duration::from_secs(5), engine.bombard())
        .await
        .expect("cancel must end the bombardment promptly");
    assert!(engine.time_taken() < Duration::from_secs(5));
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_cap_bounds_issuance() {
    let fixture = spawn_fixture(|_| ok_response(b""), Duration::ZERO).await;
    let mut cfg = config(fixture.url(), TerminationSpec::Timed(Duration::from_secs(1)));
    cfg.rate = Some(50);
    let mut engine = Barrage::new(cfg).unwrap();

    engine.bombard().await;

    // Generous bounds; precise pacing is pinned down by the paused-clock
    // limiter tests.
    let hits = fixture.hits.load(Ordering::SeqCst);
    assert!((30..=75).contains(&hits), "issued {hits}");
}

#[tokio::test(flavor = "multi_thread")]
async fn dynamic_factory_drives_path_per_call() {
    let fixture = spawn_fixture(|_| ok_response(b""), Duration::ZERO).await;
    let base = fixture.url();
    let source: FactorySource = Arc::new(move || {
        Box::new(DynamicFactory::new(
            base.clone(),
            vec![],
            Box::new(|seq| DynamicCall {
                method: Method::GET,
                path: format!("/scripted/{seq}"),
                body: Vec::new(),
            }),
        )) as Box<dyn RequestFactory>
    });

    let mut cfg = config(fixture.url(), TerminationSpec::Counted(10));
    cfg.connections = 2;
    let mut engine = Barrage::new(cfg).unwrap().with_request_source(source);

    engine.bombard().await;

    let lines = fixture.request_lines.lock();
    for seq in 0..10 {
        let expected = format!("GET /scripted/{seq} HTTP/1.1");
        assert!(lines.contains(&expected), "missing {expected:?}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn streamed_file_body_is_sent_on_every_request() {
    let dir = std::env::temp_dir().join("barrage-body-test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("payload.bin");
    std::fs::write(&path, b"stream me").unwrap();

    let fixture = spawn_fixture(|_| ok_response(b""), Duration::ZERO).await;
    let mut cfg = config(fixture.url(), TerminationSpec::Counted(5));
    cfg.connections = 2;
    cfg.method = Method::POST;
    cfg.body_file = Some(path);
    cfg.stream_body = true;
    let mut engine = Barrage::new(cfg).unwrap();

    engine.bombard().await;

    let bodies = fixture.bodies.lock();
    assert_eq!(bodies.len(), 5);
    assert!(bodies.iter().all(|b| b.as_slice() == b"stream me"));
}

#[tokio::test(flavor = "multi_thread")]
async fn report_renders_after_a_run() {
    let fixture = spawn_fixture(|_| ok_response(b"ok"), Duration::ZERO).await;
    let cfg = config(fixture.url(), TerminationSpec::Counted(10));
    let mut engine = Barrage::new(cfg).unwrap();

    engine.bombard().await;

    let mut out = Vec::new();
    report::print_intro(&mut out, engine.config()).unwrap();
    report::print(&mut out, &engine.summary(), true).unwrap();
    let rendered = String::from_utf8(out).unwrap();
    assert!(rendered.contains("Reqs/sec"));
    assert!(rendered.contains("2xx - 10"));
    assert!(rendered.contains("Throughput"));
}
