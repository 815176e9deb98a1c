//! Black-box integration tests driving the relay over raw TCP/UDP sockets,
//! covering the publish/subscribe scenarios S1-S6.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::thread;
use std::time::Duration;

use rtsp_relay::{Config, Server};

const SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=Stream\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\nm=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\n";

fn start_server(port: u16, rtp_min: u16, rtp_max: u16) -> Server {
    let config = Config {
        listen_address: "127.0.0.1".to_string(),
        listen_port: port,
        rtp_port_min: rtp_min,
        rtp_port_max: rtp_max,
        read_timeout_seconds: 2,
        max_connections: 256,
    };
    let mut server = Server::new(config);
    server.start().expect("server start");
    server
}

/// A raw RTSP client connection: writes requests, reads back a head + body
/// response, and can switch to reading `$`-framed interleaved frames once
/// its connection has negotiated in-band transport.
struct Client {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    fn connect(port: u16) -> Self {
        let addr: SocketAddr = format!("127.0.0.1:{port}")
            .to_socket_addrs()
            .unwrap()
            .next()
            .unwrap();
        let writer = TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect");
        writer
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        writer
            .set_write_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let reader = BufReader::new(writer.try_clone().unwrap());
        Self { writer, reader }
    }

    fn request(&mut self, text: &str) -> String {
        self.writer.write_all(text.as_bytes()).unwrap();
        self.writer.flush().unwrap();

        let mut response = String::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).unwrap();
            assert_ne!(n, 0, "peer closed while reading response head");
            response.push_str(&line);
            if line == "\r\n" || line == "\n" {
                break;
            }
        }

        if let Some(len) = header(&response, "Content-Length").and_then(|v| v.parse::<usize>().ok())
        {
            if len > 0 {
                let mut body = vec![0u8; len];
                self.reader.read_exact(&mut body).unwrap();
                response.push_str(&String::from_utf8_lossy(&body));
            }
        }
        response
    }

    /// Read one `$`-framed interleaved frame: (channel, payload).
    fn read_interleaved_frame(&mut self) -> (u8, Vec<u8>) {
        let mut head = [0u8; 4];
        self.reader.read_exact(&mut head).unwrap();
        assert_eq!(head[0], 0x24, "expected interleaved sentinel");
        let channel = head[1];
        let len = u16::from_be_bytes([head[2], head[3]]) as usize;
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).unwrap();
        (channel, payload)
    }
}

fn header<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("{name}:");
    response
        .lines()
        .find(|l| l.to_lowercase().starts_with(&prefix.to_lowercase()))
        .map(|l| l[prefix.len()..].trim())
}

fn session_id(response: &str) -> String {
    header(response, "Session")
        .map(|v| v.split(';').next().unwrap_or("").trim().to_string())
        .unwrap_or_default()
}

fn status_line(response: &str) -> &str {
    response.lines().next().unwrap_or("")
}

#[test]
fn s1_publish_then_subscribe_udp() {
    let mut server = start_server(19601, 20100, 20199);

    let mut source = Client::connect(19601);
    let announce = format!(
        "ANNOUNCE rtsp://127.0.0.1:19601/live RTSP/1.0\r\nCSeq: 1\r\nContent-Type: application/sdp\r\nContent-Length: {}\r\n\r\n{}",
        SDP.len(),
        SDP
    );
    let resp = source.request(&announce);
    assert!(status_line(&resp).contains("200 OK"), "ANNOUNCE: {resp}");

    let setup = "SETUP rtsp://127.0.0.1:19601/live/streamid=0 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP;unicast;client_port=9000-9001\r\n\r\n";
    let resp = source.request(setup);
    assert!(status_line(&resp).contains("200 OK"), "SETUP: {resp}");
    let transport = header(&resp, "Transport").unwrap().to_string();
    let server_port: u16 = transport
        .split("server_port=")
        .nth(1)
        .unwrap()
        .split('-')
        .next()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(server_port % 2, 0, "allocated RTP port must be even");
    let source_session = session_id(&resp);

    let record = format!(
        "RECORD rtsp://127.0.0.1:19601/live RTSP/1.0\r\nCSeq: 3\r\nSession: {source_session}\r\n\r\n"
    );
    let resp = source.request(&record);
    assert!(status_line(&resp).contains("200 OK"), "RECORD: {resp}");

    let mut client = Client::connect(19601);
    let describe =
        "DESCRIBE rtsp://127.0.0.1:19601/live RTSP/1.0\r\nCSeq: 1\r\nAccept: application/sdp\r\n\r\n";
    let resp = client.request(describe);
    assert!(status_line(&resp).contains("200 OK"), "DESCRIBE: {resp}");
    assert!(resp.contains(SDP), "DESCRIBE body should echo ANNOUNCE SDP verbatim: {resp}");

    let setup = "SETUP rtsp://127.0.0.1:19601/live/streamid=0 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP;unicast;client_port=10010-10011\r\n\r\n";
    let resp = client.request(setup);
    assert!(status_line(&resp).contains("200 OK"), "client SETUP: {resp}");
    let client_session = session_id(&resp);

    let play =
        format!("PLAY rtsp://127.0.0.1:19601/live RTSP/1.0\r\nCSeq: 3\r\nSession: {client_session}\r\n\r\n");
    let resp = client.request(&play);
    assert!(status_line(&resp).contains("200 OK"), "PLAY: {resp}");

    let recv_socket = UdpSocket::bind("127.0.0.1:10010").unwrap();
    recv_socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    // give the RTP listener thread a moment to come up after RECORD
    thread::sleep(Duration::from_millis(100));

    let send_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    send_socket
        .send_to(&[0xAA, 0xBB, 0xCC], ("127.0.0.1", server_port))
        .unwrap();

    let mut buf = [0u8; 16];
    let n = recv_socket.recv(&mut buf).expect("client should receive relayed RTP");
    assert_eq!(&buf[..n], &[0xAA, 0xBB, 0xCC]);

    server.stop();
}

#[test]
fn s2_duplicate_announce_is_forbidden() {
    let mut server = start_server(19602, 20200, 20299);

    let mut first = Client::connect(19602);
    let announce = format!(
        "ANNOUNCE rtsp://127.0.0.1:19602/live RTSP/1.0\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
        SDP.len(),
        SDP
    );
    let resp = first.request(&announce);
    assert!(status_line(&resp).contains("200 OK"), "first ANNOUNCE: {resp}");

    let mut second = Client::connect(19602);
    let resp = second.request(&announce);
    assert!(
        status_line(&resp).contains("403"),
        "duplicate ANNOUNCE should be 403 Forbidden: {resp}"
    );

    server.stop();
}

#[test]
fn s3_second_setup_after_record_is_invalid_state() {
    let mut server = start_server(19603, 20300, 20399);

    let mut source = Client::connect(19603);
    let announce = format!(
        "ANNOUNCE rtsp://127.0.0.1:19603/live RTSP/1.0\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
        SDP.len(),
        SDP
    );
    source.request(&announce);

    let setup = "SETUP rtsp://127.0.0.1:19603/live/streamid=0 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP;unicast;client_port=9010-9011\r\n\r\n";
    let resp = source.request(setup);
    let session = session_id(&resp);

    let record = format!(
        "RECORD rtsp://127.0.0.1:19603/live RTSP/1.0\r\nCSeq: 3\r\nSession: {session}\r\n\r\n"
    );
    let resp = source.request(&record);
    assert!(status_line(&resp).contains("200 OK"), "RECORD: {resp}");

    let resp = source.request(setup);
    assert!(
        status_line(&resp).contains("455"),
        "SETUP after RECORD should be 455: {resp}"
    );

    server.stop();
}

#[test]
fn s4_interleaved_publish_relays_to_interleaved_subscriber() {
    let mut server = start_server(19604, 20400, 20499);

    let mut source = Client::connect(19604);
    let announce = format!(
        "ANNOUNCE rtsp://127.0.0.1:19604/live RTSP/1.0\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
        SDP.len(),
        SDP
    );
    source.request(&announce);

    let setup = "SETUP rtsp://127.0.0.1:19604/live/streamid=0 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP/TCP;interleaved=0-1\r\n\r\n";
    let resp = source.request(setup);
    assert!(status_line(&resp).contains("200 OK"), "source SETUP: {resp}");
    assert_eq!(
        header(&resp, "Transport"),
        Some("RTP/AVP/TCP;interleaved=0-1"),
        "interleaved SETUP should echo the negotiated channel pair: {resp}"
    );
    let source_session = session_id(&resp);

    let record = format!(
        "RECORD rtsp://127.0.0.1:19604/live RTSP/1.0\r\nCSeq: 3\r\nSession: {source_session}\r\n\r\n"
    );
    source.request(&record);

    let mut client = Client::connect(19604);
    client.request(
        "DESCRIBE rtsp://127.0.0.1:19604/live RTSP/1.0\r\nCSeq: 1\r\n\r\n",
    );
    let setup = "SETUP rtsp://127.0.0.1:19604/live/streamid=0 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP/TCP;interleaved=2-3\r\n\r\n";
    let resp = client.request(setup);
    assert!(status_line(&resp).contains("200 OK"), "client SETUP: {resp}");
    let client_session = session_id(&resp);

    let play = format!(
        "PLAY rtsp://127.0.0.1:19604/live RTSP/1.0\r\nCSeq: 3\r\nSession: {client_session}\r\n\r\n"
    );
    let resp = client.request(&play);
    assert!(status_line(&resp).contains("200 OK"), "PLAY: {resp}");

    // $ 00 00 03 AA BB CC
    source
        .writer
        .write_all(&[0x24, 0x00, 0x00, 0x03, 0xAA, 0xBB, 0xCC])
        .unwrap();
    source.writer.flush().unwrap();

    let (channel, payload) = client.read_interleaved_frame();
    assert_eq!(channel, 2, "relayed frame should carry the client's own channel");
    assert_eq!(payload, vec![0xAA, 0xBB, 0xCC]);

    server.stop();
}

#[test]
fn s5_source_disconnect_unmounts_stream() {
    let mut server = start_server(19605, 20500, 20599);

    let mut source = Client::connect(19605);
    let announce = format!(
        "ANNOUNCE rtsp://127.0.0.1:19605/live RTSP/1.0\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
        SDP.len(),
        SDP
    );
    source.request(&announce);
    let setup = "SETUP rtsp://127.0.0.1:19605/live/streamid=0 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP;unicast;client_port=9020-9021\r\n\r\n";
    let resp = source.request(setup);
    let session = session_id(&resp);
    let record = format!(
        "RECORD rtsp://127.0.0.1:19605/live RTSP/1.0\r\nCSeq: 3\r\nSession: {session}\r\n\r\n"
    );
    let resp = source.request(&record);
    assert!(status_line(&resp).contains("200 OK"), "RECORD: {resp}");

    drop(source);
    thread::sleep(Duration::from_millis(300));

    let mut client = Client::connect(19605);
    let resp = client.request("DESCRIBE rtsp://127.0.0.1:19605/live RTSP/1.0\r\nCSeq: 1\r\n\r\n");
    assert!(
        status_line(&resp).contains("404"),
        "mount should be gone after source disconnect: {resp}"
    );

    server.stop();
}

#[test]
fn s6_unknown_method_is_not_implemented_and_connection_stays_open() {
    let mut server = start_server(19606, 20600, 20699);

    let mut client = Client::connect(19606);
    let resp = client.request("FOO rtsp://127.0.0.1:19606/live RTSP/1.0\r\nCSeq: 7\r\n\r\n");
    assert!(status_line(&resp).contains("501"), "unknown method: {resp}");
    assert_eq!(header(&resp, "CSeq"), Some("7"));

    let resp = client.request("OPTIONS rtsp://127.0.0.1:19606/live RTSP/1.0\r\nCSeq: 8\r\n\r\n");
    assert!(
        status_line(&resp).contains("200 OK"),
        "connection should survive an unknown method: {resp}"
    );

    server.stop();
}

#[test]
fn malformed_header_gets_bad_request_and_connection_stays_open() {
    let mut server = start_server(19607, 20700, 20799);

    let mut client = Client::connect(19607);
    let resp = client.request("OPTIONS rtsp://127.0.0.1:19607/live RTSP/1.0\r\nBadHeaderNoColon\r\n\r\n");
    assert!(
        status_line(&resp).contains("400"),
        "malformed header should be 400 Bad Request: {resp}"
    );

    let resp = client.request("OPTIONS rtsp://127.0.0.1:19607/live RTSP/1.0\r\nCSeq: 1\r\n\r\n");
    assert!(
        status_line(&resp).contains("200 OK"),
        "connection should survive a malformed header: {resp}"
    );

    server.stop();
}

#[test]
fn unsupported_version_gets_bad_request_and_connection_stays_open() {
    let mut server = start_server(19608, 20800, 20899);

    let mut client = Client::connect(19608);
    let resp = client.request("OPTIONS rtsp://127.0.0.1:19608/live RTSP/2.0\r\nCSeq: 1\r\n\r\n");
    assert!(
        status_line(&resp).contains("400"),
        "unsupported version should be 400 Bad Request: {resp}"
    );

    let resp = client.request("OPTIONS rtsp://127.0.0.1:19608/live RTSP/1.0\r\nCSeq: 2\r\n\r\n");
    assert!(
        status_line(&resp).contains("200 OK"),
        "connection should survive an unsupported version request: {resp}"
    );

    server.stop();
}
