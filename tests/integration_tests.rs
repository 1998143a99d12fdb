//! End-to-end tests: a real server on an ephemeral port, driven by the
//! client library and by hand-written frames.

use client::network::{Client, ClientError};
use server::app::{App, RunningApp};
use server::config::ServerConfig;
use server::notify::Broadcaster;
use shared::protocol::{Credentials, ReviewSubmission};
use shared::{encode, Badge, FrameHeader, Hotel, Message, Scores, HEADER_LEN};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_test::{assert_err, assert_ok};

const RANKING_PERIOD: Duration = Duration::from_millis(100);

#[derive(Default)]
struct RecordingBroadcaster {
    lines: Mutex<Vec<String>>,
}

impl RecordingBroadcaster {
    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn announce(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

/// Two Pisa hotels and one in Roma. Hotel 1 starts ahead of hotel 2 with a
/// single weak review; one good review of hotel 2 overtakes it.
fn seed_hotels(dir: &Path) {
    let mut first = Hotel::new(1, "Hotel Pisa 1", "Near the tower", "Pisa", "050 1", vec![]);
    first.rate = 1.0;
    first.review_count = 1;
    let second = Hotel::new(2, "Hotel Pisa 2", "By the river", "Pisa", "050 2", vec![]);
    let third = Hotel::new(3, "Hotel Roma 1", "Centre", "Roma", "06 1", vec![]);

    let json = serde_json::to_vec_pretty(&vec![first, second, third]).unwrap();
    std::fs::write(dir.join("Hotels.json"), json).unwrap();
}

async fn start_server() -> (RunningApp, Arc<RecordingBroadcaster>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    seed_hotels(dir.path());

    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        tcp_port: 0,
        data_dir: dir.path().to_path_buf(),
        ..ServerConfig::default()
    };

    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let running = App::new(config)
        .unwrap()
        .with_broadcaster(broadcaster.clone())
        .with_ranking_interval(RANKING_PERIOD)
        .start()
        .await
        .unwrap();

    (running, broadcaster, dir)
}

async fn read_frame(stream: &mut TcpStream) -> Message {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await.unwrap();
    let header = FrameHeader::parse(&header);
    let mut payload = vec![0u8; header.len as usize];
    stream.read_exact(&mut payload).await.unwrap();
    shared::decode(header.tag, &payload).unwrap()
}

/// SESSION FLOW TESTS
mod session_tests {
    use super::*;

    /// Register, log in, review and read the badge through the client library
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_review_session() {
        let (running, _, _dir) = start_server().await;
        let mut client = Client::connect(running.local_addr()).await.unwrap();

        assert_eq!(assert_ok!(client.register("ann", "secret").await), "User ann registered");
        assert_eq!(assert_ok!(client.login("ann", "secret").await), "Login successful");

        let response = client
            .insert_review("hotel pisa 2", "PISA", 5, Scores::new(5, 4, 5, 4))
            .await;
        assert_eq!(assert_ok!(response), "Review added");
        assert_eq!(assert_ok!(client.show_badge().await), Badge::Reviewer);

        let hotel = assert_ok!(client.search_hotel("Hotel Pisa 2", "Pisa").await);
        assert_eq!(hotel.review_count, 1);
        assert_eq!(hotel.rate, 5.0);

        assert_eq!(assert_ok!(client.logout().await), "Logout successful");
        running.shutdown().await;
    }

    /// Errors come back as responses and leave the connection usable
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn errors_do_not_end_the_session() {
        let (running, _, _dir) = start_server().await;
        let mut client = Client::connect(running.local_addr()).await.unwrap();

        match client.show_badge().await {
            Err(ClientError::Server(message)) => assert!(message.starts_with("[ERROR] ")),
            other => panic!("expected a server error, got {:?}", other),
        }
        assert_err!(client.login("nobody", "x").await);
        assert_err!(client.search_hotel("Hotel Nowhere", "Pisa").await);

        assert_ok!(client.register("bob", "pw").await);
        assert_err!(client.register("BOB", "other").await);
        assert_ok!(client.login("Bob", "PW").await);
        assert_err!(client.login("bob", "pw").await);

        assert_err!(
            client
                .insert_review("Hotel Pisa 1", "Pisa", 6, Scores::new(1, 1, 1, 1))
                .await
        );
        running.shutdown().await;
    }

    /// A username can only be logged in on one connection at a time
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn duplicate_login_rejected() {
        let (running, _, _dir) = start_server().await;
        let mut first = Client::connect(running.local_addr()).await.unwrap();
        let mut second = Client::connect(running.local_addr()).await.unwrap();

        assert_ok!(first.register("carl", "pw").await);
        assert_ok!(first.login("carl", "pw").await);

        match second.login("carl", "pw").await {
            Err(ClientError::Server(message)) => assert!(message.contains("another connection")),
            other => panic!("expected rejection, got {:?}", other),
        }

        assert_ok!(first.logout().await);
        assert_ok!(second.login("carl", "pw").await);
        running.shutdown().await;
    }

    /// Dropping a connection logs its user out
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnect_logs_out() {
        let (running, _, _dir) = start_server().await;
        let addr = running.local_addr();

        let mut first = Client::connect(addr).await.unwrap();
        assert_ok!(first.register("dora", "pw").await);
        assert_ok!(first.login("dora", "pw").await);
        drop(first);

        let mut second = Client::connect(addr).await.unwrap();
        let mut logged_in = false;
        for _ in 0..50 {
            if second.login("dora", "pw").await.is_ok() {
                logged_in = true;
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert!(logged_in, "login stayed taken after disconnect");
        running.shutdown().await;
    }

    /// Reviews and users survive a restart
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_persists_data() {
        let (running, _, dir) = start_server().await;
        let mut client = Client::connect(running.local_addr()).await.unwrap();
        assert_ok!(client.register("eve", "pw").await);
        assert_ok!(client.login("eve", "pw").await);
        assert_ok!(
            client
                .insert_review("Hotel Roma 1", "Roma", 4, Scores::new(4, 4, 4, 4))
                .await
        );
        drop(client);
        running.shutdown().await;

        let users: Vec<serde_json::Value> =
            serde_json::from_slice(&std::fs::read(dir.path().join("Users.json")).unwrap()).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["username"], "eve");

        let reviews: Vec<serde_json::Value> =
            serde_json::from_slice(&std::fs::read(dir.path().join("Reviews.json")).unwrap())
                .unwrap();
        assert_eq!(reviews.len(), 1);

        let hotels: Vec<Hotel> =
            serde_json::from_slice(&std::fs::read(dir.path().join("Hotels.json")).unwrap()).unwrap();
        let roma = hotels.iter().find(|hotel| hotel.id == 3).unwrap();
        assert_eq!(roma.review_count, 1);
    }
}

/// WIRE LEVEL TESTS
mod wire_tests {
    use super::*;

    /// A header split over several writes is reassembled
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn split_frame_is_reassembled() {
        let (running, _, _dir) = start_server().await;
        let mut stream = TcpStream::connect(running.local_addr()).await.unwrap();

        let frame = encode(&Message::Register(Credentials::new("fay", "pw"))).unwrap();
        stream.write_all(&frame[..3]).await.unwrap();
        sleep(Duration::from_millis(30)).await;
        stream.write_all(&frame[3..HEADER_LEN + 2]).await.unwrap();
        sleep(Duration::from_millis(30)).await;
        stream.write_all(&frame[HEADER_LEN + 2..]).await.unwrap();

        match read_frame(&mut stream).await {
            Message::RegisterResponse(confirmation) => {
                assert_eq!(confirmation.response, "User fay registered")
            }
            other => panic!("unexpected {:?}", other),
        }
        running.shutdown().await;
    }

    /// Pipelined requests are answered in order
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pipelined_requests_answered_in_order() {
        let (running, _, _dir) = start_server().await;
        let mut stream = TcpStream::connect(running.local_addr()).await.unwrap();

        let mut bytes = encode(&Message::Register(Credentials::new("gil", "pw"))).unwrap();
        bytes.extend(encode(&Message::Login(Credentials::new("gil", "pw"))).unwrap());
        stream.write_all(&bytes).await.unwrap();

        assert!(matches!(read_frame(&mut stream).await, Message::RegisterResponse(_)));
        assert!(matches!(read_frame(&mut stream).await, Message::LoginResponse(_)));
        running.shutdown().await;
    }

    /// A malformed payload is skipped; the next frame is still served
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_frame_is_discarded() {
        let (running, _, _dir) = start_server().await;
        let mut stream = TcpStream::connect(running.local_addr()).await.unwrap();

        let garbage = b"{ not json";
        let header = FrameHeader {
            len: garbage.len() as u32,
            tag: shared::protocol::TAG_LOGIN,
        };
        stream.write_all(&header.to_bytes()).await.unwrap();
        stream.write_all(garbage).await.unwrap();

        let frame = encode(&Message::Register(Credentials::new("hal", "pw"))).unwrap();
        stream.write_all(&frame).await.unwrap();
        assert!(matches!(read_frame(&mut stream).await, Message::RegisterResponse(_)));
        running.shutdown().await;
    }

    /// A negative rate is answered with a validation error
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn negative_rate_gets_error_response() {
        let (running, _, _dir) = start_server().await;
        let mut stream = TcpStream::connect(running.local_addr()).await.unwrap();

        let mut bytes = encode(&Message::Register(Credentials::new("kim", "pw"))).unwrap();
        bytes.extend(encode(&Message::Login(Credentials::new("kim", "pw"))).unwrap());
        stream.write_all(&bytes).await.unwrap();
        assert!(matches!(read_frame(&mut stream).await, Message::RegisterResponse(_)));
        assert!(matches!(read_frame(&mut stream).await, Message::LoginResponse(_)));

        let mut submission =
            ReviewSubmission::new("Hotel Pisa 1", "Pisa", 3, Scores::new(3, 3, 3, 3));
        submission.rate = -1;
        stream
            .write_all(&encode(&Message::Review(submission)).unwrap())
            .await
            .unwrap();

        let response = timeout(Duration::from_secs(2), read_frame(&mut stream))
            .await
            .expect("no response to an out-of-range review");
        match response {
            Message::Error(e) => assert!(e.message.starts_with("[ERROR] Rate and scores")),
            other => panic!("unexpected {:?}", other),
        }
        running.shutdown().await;
    }

    /// An announced payload over the limit closes the connection
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn oversized_frame_closes_connection() {
        let (running, _, _dir) = start_server().await;
        let mut stream = TcpStream::connect(running.local_addr()).await.unwrap();

        let header = FrameHeader {
            len: u32::MAX,
            tag: shared::protocol::TAG_REGISTER,
        };
        stream.write_all(&header.to_bytes()).await.unwrap();

        let mut buf = [0u8; 16];
        let read = timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("connection was not closed");
        assert!(matches!(read, Ok(0) | Err(_)));
        running.shutdown().await;
    }
}

/// RANKING NOTIFICATION TESTS
mod ranking_tests {
    use super::*;

    /// A review that changes the order of a city produces both a directed
    /// push to subscribers and a multicast announcement of the new top hotel
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn review_triggers_push_and_announcement() {
        let (running, broadcaster, _dir) = start_server().await;

        let mut watcher = Client::connect(running.local_addr()).await.unwrap();
        assert_ok!(watcher.subscribe(&["pisa"]).await);

        // let the silent first cycle record the initial ordering
        sleep(RANKING_PERIOD * 3).await;
        assert!(broadcaster.lines().is_empty());

        let mut reviewer = Client::connect(running.local_addr()).await.unwrap();
        assert_ok!(reviewer.register("ivy", "pw").await);
        assert_ok!(reviewer.login("ivy", "pw").await);
        assert_ok!(
            reviewer
                .insert_review("Hotel Pisa 2", "Pisa", 5, Scores::new(5, 5, 5, 5))
                .await
        );

        let rank = timeout(Duration::from_secs(5), watcher.next_rank_update())
            .await
            .expect("no rank update pushed")
            .unwrap();
        assert_eq!(rank.city, "Pisa");
        assert_eq!(rank.hotel_ids(), vec![2, 1]);
        assert_eq!(rank.hotels[0].local_rank, 1);

        let lines = broadcaster.lines();
        assert_eq!(lines, vec!["Pisa top hotel changed: Hotel Pisa 2".to_string()]);

        let listed = assert_ok!(reviewer.search_all_hotels("Pisa").await);
        let ids: Vec<u32> = listed.iter().map(|hotel| hotel.id).collect();
        assert_eq!(ids, vec![2, 1]);
        running.shutdown().await;
    }

    /// Unsubscribed connections receive nothing
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unsubscribe_stops_pushes() {
        let (running, broadcaster, _dir) = start_server().await;

        let mut watcher = Client::connect(running.local_addr()).await.unwrap();
        assert_ok!(watcher.subscribe(&["Pisa"]).await);
        assert_ok!(watcher.unsubscribe().await);
        sleep(RANKING_PERIOD * 3).await;

        let mut reviewer = Client::connect(running.local_addr()).await.unwrap();
        assert_ok!(reviewer.register("jay", "pw").await);
        assert_ok!(reviewer.login("jay", "pw").await);
        assert_ok!(
            reviewer
                .insert_review("Hotel Pisa 2", "Pisa", 5, Scores::new(5, 5, 5, 5))
                .await
        );

        for _ in 0..50 {
            if !broadcaster.lines().is_empty() {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(broadcaster.lines().len(), 1);

        let pushed = timeout(RANKING_PERIOD * 3, watcher.next_rank_update()).await;
        assert!(pushed.is_err(), "unsubscribed connection received a push");
        running.shutdown().await;
    }
}
