use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mbserver::*;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};

const UNIT_ID: u8 = 0x01;

fn any_local_port() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn init_logging() {
    // tests share the process, the first one installs the subscriber
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Minimal MBAP client that sends one request at a time
struct Client<S = TcpStream> {
    stream: S,
    tx_id: u16,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        Self::new(TcpStream::connect(addr).await.unwrap())
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(stream: S) -> Self {
        Self { stream, tx_id: 0 }
    }

    fn encode(&mut self, function: u8, data: &[u8]) -> Vec<u8> {
        self.tx_id = self.tx_id.wrapping_add(1);
        TcpFrame::new(self.tx_id, UnitId::new(UNIT_ID), function, data.to_vec()).to_bytes()
    }

    async fn read_reply(&mut self) -> TcpFrame {
        let mut header = [0u8; 7];
        self.stream.read_exact(&mut header).await.unwrap();
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut pdu = vec![0u8; length - 1];
        self.stream.read_exact(&mut pdu).await.unwrap();

        let raw: Vec<u8> = header.iter().chain(pdu.iter()).copied().collect();
        let reply = TcpFrame::decode(&raw).unwrap();
        assert_eq!(reply.tx_id(), self.tx_id);
        assert_eq!(reply.unit_id(), UnitId::new(UNIT_ID));
        reply
    }

    async fn request(&mut self, function: u8, data: &[u8]) -> TcpFrame {
        let bytes = self.encode(function, data);
        self.stream.write_all(&bytes).await.unwrap();
        self.read_reply().await
    }

    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Vec<u16> {
        let mut data = start.to_be_bytes().to_vec();
        data.extend_from_slice(&count.to_be_bytes());
        let reply = self.request(code::READ_HOLDING_REGISTERS, &data).await;
        assert_eq!(reply.function(), code::READ_HOLDING_REGISTERS);
        assert_eq!(reply.data()[0] as usize, 2 * count as usize);
        reply.data()[1..]
            .chunks_exact(2)
            .map(|x| u16::from_be_bytes([x[0], x[1]]))
            .collect()
    }

    async fn write_multiple_registers(&mut self, start: u16, values: &[u16]) {
        let mut data = start.to_be_bytes().to_vec();
        data.extend_from_slice(&(values.len() as u16).to_be_bytes());
        data.push((2 * values.len()) as u8);
        for value in values {
            data.extend_from_slice(&value.to_be_bytes());
        }
        let reply = self.request(code::WRITE_MULTIPLE_REGISTERS, &data).await;
        assert_eq!(reply.function(), code::WRITE_MULTIPLE_REGISTERS);
        assert_eq!(reply.data(), &data[..4]);
    }

    async fn is_closed(&mut self) -> bool {
        let mut buffer = [0u8; 1];
        matches!(
            tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut buffer)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}

async fn test_requests_and_responses() {
    init_logging();
    let mut server = Server::new();
    {
        let memory = server.memory_mut();
        for idx in [10, 11, 17, 18] {
            memory.coils_mut()[idx] = true;
        }
        for idx in [0, 7, 8, 9] {
            memory.discrete_inputs_mut()[idx] = true;
        }
        memory.input_registers_mut()[100..103].copy_from_slice(&[1, 2, 65535]);
    }

    let handle = server.spawn();
    let addr = handle.listen_tcp(any_local_port()).await.unwrap();
    let mut client = Client::connect(addr).await;

    let reply = client
        .request(code::READ_COILS, &[0x00, 0x0A, 0x00, 0x09])
        .await;
    assert_eq!(reply.data(), &[2, 131, 1]);

    let reply = client
        .request(code::READ_DISCRETE_INPUTS, &[0x00, 0x00, 0x00, 0x0A])
        .await;
    assert_eq!(reply.data(), &[2, 129, 3]);

    let reply = client
        .request(code::READ_INPUT_REGISTERS, &[0x00, 0x64, 0x00, 0x03])
        .await;
    assert_eq!(reply.data(), &[6, 0, 1, 0, 2, 255, 255]);

    let reply = client
        .request(code::WRITE_SINGLE_COIL, &[0x00, 0x01, 0xFF, 0x00])
        .await;
    assert_eq!(reply.data(), &[0x00, 0x01, 0xFF, 0x00]);

    let reply = client
        .request(code::WRITE_MULTIPLE_COILS, &[0x00, 0x02, 0x00, 0x02, 0x01, 0x03])
        .await;
    assert_eq!(reply.data(), &[0x00, 0x02, 0x00, 0x02]);

    let reply = client
        .request(code::READ_COILS, &[0x00, 0x00, 0x00, 0x04])
        .await;
    assert_eq!(reply.data(), &[1, 0b1110]);

    let reply = client
        .request(code::WRITE_SINGLE_REGISTER, &[0x00, 0x05, 0xCA, 0xFE])
        .await;
    assert_eq!(reply.data(), &[0x00, 0x05, 0xCA, 0xFE]);

    client.write_multiple_registers(1, &[3, 4]).await;
    assert_eq!(client.read_holding_registers(0, 6).await, vec![0, 3, 4, 0, 0, 0xCAFE]);

    // exceptions leave the session open
    let reply = client
        .request(code::READ_INPUT_REGISTERS, &[0xFF, 0xFA, 0x00, 0x06])
        .await;
    assert_eq!(reply.function(), 0x84);
    assert_eq!(reply.data(), &[ExceptionCode::IllegalDataAddress.value()]);

    let reply = client.request(0x2B, &[0x0E, 0x01, 0x00]).await;
    assert_eq!(reply.function(), 0xAB);
    assert_eq!(reply.data(), &[ExceptionCode::IllegalFunction.value()]);

    assert_eq!(client.read_holding_registers(1, 2).await, vec![3, 4]);

    let coils = handle
        .transaction(|memory| memory.coils()[0..4].to_vec())
        .await
        .unwrap();
    assert_eq!(coils, vec![false, true, true, true]);

    handle.shutdown().await;
    assert!(client.is_closed().await);
}

#[test]
fn can_read_and_write_values() {
    let rt = Runtime::new().unwrap();
    rt.block_on(test_requests_and_responses());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_never_observe_torn_writes() {
    init_logging();
    const NUM_CLIENTS: u16 = 8;
    const NUM_ITERATIONS: usize = 50;
    const NUM_REGISTERS: usize = 20;

    let handle = Server::new().spawn();
    let addr = handle.listen_tcp(any_local_port()).await.unwrap();

    let mut tasks = Vec::new();
    for id in 0..NUM_CLIENTS {
        tasks.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            let values = [id + 1; NUM_REGISTERS];
            for _ in 0..NUM_ITERATIONS {
                client.write_multiple_registers(0, &values).await;
                let read = client.read_holding_registers(0, NUM_REGISTERS as u16).await;
                let first = read[0];
                assert!(
                    read.iter().all(|x| *x == first),
                    "torn write observed: {read:?}"
                );
            }
        }));
    }

    // the application sees the same atomicity as the clients
    for _ in 0..NUM_ITERATIONS {
        let read = handle
            .transaction(|memory| memory.holding_registers()[0..NUM_REGISTERS].to_vec())
            .await
            .unwrap();
        assert!(read.iter().all(|x| *x == read[0]), "torn write observed: {read:?}");
    }

    for task in tasks {
        task.await.unwrap();
    }

    handle.shutdown().await;
}

#[tokio::test]
async fn segmented_and_coalesced_requests_are_reassembled() {
    init_logging();
    let mut server = Server::new();
    server.memory_mut().holding_registers_mut()[0] = 0x1234;
    let handle = server.spawn();
    let addr = handle.listen_tcp(any_local_port()).await.unwrap();
    let mut client = Client::connect(addr).await;

    let request = client.encode(code::READ_HOLDING_REGISTERS, &[0x00, 0x00, 0x00, 0x01]);
    let (first, second) = request.split_at(5);
    client.stream.write_all(first).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.stream.write_all(second).await.unwrap();
    assert_eq!(client.read_reply().await.data(), &[0x02, 0x12, 0x34]);

    // two requests in one write are both answered, in order
    let mut both = client.encode(code::WRITE_SINGLE_REGISTER, &[0x00, 0x00, 0x43, 0x21]);
    let write_tx_id = client.tx_id;
    both.extend(client.encode(code::READ_HOLDING_REGISTERS, &[0x00, 0x00, 0x00, 0x01]));
    client.stream.write_all(&both).await.unwrap();

    let mut header = [0u8; 12];
    client.stream.read_exact(&mut header).await.unwrap();
    let write_reply = TcpFrame::decode(&header).unwrap();
    assert_eq!(write_reply.tx_id(), write_tx_id);
    assert_eq!(client.read_reply().await.data(), &[0x02, 0x43, 0x21]);

    handle.shutdown().await;
}

#[tokio::test]
async fn bad_frame_closes_only_the_offending_connection() {
    init_logging();
    let handle = Server::new().spawn();
    let addr = handle.listen_tcp(any_local_port()).await.unwrap();

    let mut good = Client::connect(addr).await;
    let mut bad = Client::connect(addr).await;

    // non-zero protocol id
    bad.stream
        .write_all(&[0x00, 0x01, 0xCA, 0xFE, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01])
        .await
        .unwrap();
    assert!(bad.is_closed().await);

    assert_eq!(good.read_holding_registers(0, 1).await, vec![0]);

    handle.shutdown().await;
}

#[tokio::test]
async fn oldest_session_is_closed_when_max_sessions_is_exceeded() {
    init_logging();
    let handle = Server::with_settings(ServerSettings {
        max_sessions: 1,
        ..Default::default()
    })
    .spawn();
    let addr = handle.listen_tcp(any_local_port()).await.unwrap();

    let mut first = Client::connect(addr).await;
    assert_eq!(first.read_holding_registers(0, 1).await, vec![0]);

    let mut second = Client::connect(addr).await;
    assert_eq!(second.read_holding_registers(0, 1).await, vec![0]);

    assert!(first.is_closed().await);

    handle.shutdown().await;
}

#[tokio::test]
async fn servers_do_not_share_function_tables() {
    init_logging();
    let mut custom = Server::new();
    custom.register_function_handler(0x41, |memory, request| {
        memory.holding_registers_mut()[0] = request.data().len() as u16;
        Ok(vec![0xAA])
    });

    let custom = custom.spawn();
    let standard = Server::new().spawn();
    let custom_addr = custom.listen_tcp(any_local_port()).await.unwrap();
    let standard_addr = standard.listen_tcp(any_local_port()).await.unwrap();

    let mut client = Client::connect(custom_addr).await;
    let reply = client.request(0x41, &[1, 2, 3]).await;
    assert_eq!(reply.function(), 0x41);
    assert_eq!(reply.data(), &[0xAA]);
    assert_eq!(client.read_holding_registers(0, 1).await, vec![3]);

    let mut client = Client::connect(standard_addr).await;
    let reply = client.request(0x41, &[1, 2, 3]).await;
    assert_eq!(reply.function(), 0xC1);
    assert_eq!(reply.data(), &[ExceptionCode::IllegalFunction.value()]);

    custom.shutdown().await;
    standard.shutdown().await;
}

#[tokio::test]
async fn listener_is_closed_after_shutdown() {
    init_logging();
    let handle = Server::new().spawn();
    let addr = handle.listen_tcp(any_local_port()).await.unwrap();
    handle.shutdown().await;

    assert!(TcpStream::connect(addr).await.is_err());
}

fn tls_configs() -> (TlsServerConfig, tokio_rustls::TlsConnector) {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let server = rustls::ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.der().clone()], key)
        .unwrap();

    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert.der().clone()).unwrap();
    let client = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();

    (
        TlsServerConfig::from(server),
        tokio_rustls::TlsConnector::from(Arc::new(client)),
    )
}

#[tokio::test]
async fn can_read_and_write_values_over_tls() {
    init_logging();
    let (server_config, connector) = tls_configs();
    let handle = Server::new().spawn();
    let addr = handle.listen_tls(any_local_port(), server_config).await.unwrap();

    let socket = TcpStream::connect(addr).await.unwrap();
    let name = ServerName::try_from("localhost").unwrap();
    let mut client = Client::new(connector.connect(name, socket).await.unwrap());

    let reply = client
        .request(code::WRITE_SINGLE_REGISTER, &[0x00, 0x07, 0xBE, 0xEF])
        .await;
    assert_eq!(reply.data(), &[0x00, 0x07, 0xBE, 0xEF]);
    assert_eq!(client.read_holding_registers(7, 1).await, vec![0xBEEF]);

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_completes_while_a_tls_handshake_is_pending() {
    init_logging();
    let (server_config, _) = tls_configs();
    let handle = Server::new().spawn();
    let addr = handle.listen_tls(any_local_port(), server_config).await.unwrap();

    // connects but never sends a client hello
    let _socket = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("shutdown waited on the handshake");
}

#[tokio::test]
async fn shutdown_completes_while_a_client_stops_reading_replies() {
    init_logging();
    let handle = Server::new().spawn();
    let addr = handle.listen_tcp(any_local_port()).await.unwrap();

    let mut client = Client::connect(addr).await;
    let request = client.encode(code::READ_HOLDING_REGISTERS, &[0x00, 0x00, 0x00, 0x7D]);
    let (_read, mut write) = client.stream.into_split();

    // keep requesting large replies without reading any, until the socket buffers fill
    let flood = tokio::spawn(async move { while write.write_all(&request).await.is_ok() {} });
    tokio::time::sleep(Duration::from_millis(500)).await;

    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("shutdown waited on the blocked reply");
    flood.abort();
}
