use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use futures::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use bandstore::client::Session;
use bandstore::config::ServerConfig;
use bandstore::frame::Frame;
use bandstore::message::{Response, Status};
use bandstore::repl::{Flow, Repl};
use bandstore::store::Store;
use bandstore::{server, Error};

const TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), Error>>,
}

impl TestServer {
    async fn start(config: ServerConfig) -> TestServer {
        let store = Store::open(&config.data_file).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server::serve(listener, store, config, rx));

        TestServer {
            addr,
            shutdown,
            handle,
        }
    }

    async fn session(&self) -> Session {
        Session::connect(self.addr, TIMEOUT).await.unwrap()
    }

    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

fn config(dir: &tempfile::TempDir) -> ServerConfig {
    ServerConfig {
        data_file: dir.path().join("bands.dat"),
        flush_interval: 0,
        ..ServerConfig::default()
    }
}

fn band(name: &str) -> Frame {
    Frame::map()
        .with("name", Frame::bulk(name))
        .with(
            "coordinates",
            Frame::map()
                .with("x", Frame::Double(-584.0))
                .with("y", Frame::Double(3.25)),
        )
        .with("participants", Frame::Integer(4))
        .with("established", Frame::bulk("1971-09-01"))
        .with("genre", Frame::bulk("POST_ROCK"))
        .with("studio", Frame::map().with("address", Frame::bulk("Hansa, Berlin")))
}

fn id_of(response: &Response) -> i64 {
    match response.payload.as_ref().and_then(|p| p.get("id")) {
        Some(Frame::Integer(id)) => *id,
        other => panic!("response without id: {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_adds_get_distinct_ids() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(config(&dir)).await;

    let adds = (0..16).map(|i| {
        let addr = server.addr;
        tokio::spawn(async move {
            let mut session = Session::connect(addr, TIMEOUT).await.unwrap();
            session
                .execute("add", vec![band(&format!("band {}", i))])
                .await
                .unwrap()
        })
    });
    let responses: Vec<Response> = join_all(adds)
        .await
        .into_iter()
        .map(|res| res.unwrap())
        .collect();

    let ids: HashSet<i64> = responses.iter().map(id_of).collect();
    assert_eq!(ids.len(), 16);

    let mut session = server.session().await;
    let count = session.execute("count", vec![]).await.unwrap();
    assert_eq!(count.payload, Some(Frame::Integer(16)));

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_command_keeps_the_connection() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(config(&dir)).await;
    let mut session = server.session().await;

    let unknown = session.execute("frobnicate", vec![]).await.unwrap();
    let count = session.execute("count", vec![]).await.unwrap();

    assert_eq!(unknown.status, Status::UnknownCommand);
    assert_eq!(count.status, Status::Ok);
    assert_eq!(count.payload, Some(Frame::Integer(0)));

    server.stop().await;
}

#[tokio::test]
async fn test_missing_field_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(config(&dir)).await;
    let mut session = server.session().await;

    let nameless = match band("ignored") {
        Frame::Map(entries) => Frame::Map(entries.into_iter().filter(|(k, _)| k != "name").collect()),
        _ => unreachable!(),
    };
    let res = session.execute("add", vec![nameless]).await.unwrap();
    let count = session.execute("count", vec![]).await.unwrap();

    assert_eq!(res.status, Status::InvalidArgument);
    assert!(res.message.contains("name"), "{}", res.message);
    assert_eq!(count.payload, Some(Frame::Integer(0)));

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_removals_of_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(config(&dir)).await;
    let mut session = server.session().await;
    let id = id_of(&session.execute("add", vec![band("Can")]).await.unwrap());

    let removals = (0..8).map(|_| {
        let addr = server.addr;
        tokio::spawn(async move {
            let mut session = Session::connect(addr, TIMEOUT).await.unwrap();
            session
                .execute("remove-by-id", vec![Frame::Integer(id)])
                .await
                .unwrap()
        })
    });
    let statuses: Vec<Status> = join_all(removals)
        .await
        .into_iter()
        .map(|res| res.unwrap().status)
        .collect();

    assert_eq!(statuses.iter().filter(|s| **s == Status::Ok).count(), 1);
    assert!(statuses
        .iter()
        .all(|s| *s == Status::Ok || *s == Status::InvalidArgument));

    server.stop().await;
}

#[tokio::test]
async fn test_list_and_count_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(config(&dir)).await;
    let mut session = server.session().await;
    for name in ["Can", "Neu!", "Faust"] {
        session.execute("add", vec![band(name)]).await.unwrap();
    }

    let first = session.execute("list", vec![]).await.unwrap();
    let count = session.execute("count", vec![]).await.unwrap();
    let second = session.execute("list", vec![]).await.unwrap();

    assert_eq!(first.payload, second.payload);
    assert_eq!(count.payload, Some(Frame::Integer(3)));
    match first.payload {
        Some(Frame::Array(records)) => {
            let names: Vec<_> = records
                .iter()
                .filter_map(|r| r.get("name").and_then(Frame::as_str))
                .collect();
            assert_eq!(names, vec!["Can", "Neu!", "Faust"]);
        }
        other => panic!("unexpected payload {:?}", other),
    }

    server.stop().await;
}

#[tokio::test]
async fn test_update_then_filter() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(config(&dir)).await;
    let mut session = server.session().await;
    for name in ["Can", "Neu!", "Faust"] {
        session.execute("add", vec![band(name)]).await.unwrap();
    }

    let update = session
        .execute(
            "update_by_id",
            vec![
                Frame::bulk("2"),
                Frame::map().with("participants", Frame::Integer(2)),
            ],
        )
        .await
        .unwrap();
    let small = session
        .execute(
            "filter-by-predicate",
            vec![Frame::bulk("participants"), Frame::bulk("lt"), Frame::bulk("3")],
        )
        .await
        .unwrap();

    assert_eq!(update.status, Status::Ok);
    match small.payload {
        Some(Frame::Array(records)) => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].get("id"), Some(&Frame::Integer(2)));
        }
        other => panic!("unexpected payload {:?}", other),
    }

    server.stop().await;
}

#[tokio::test]
async fn test_collection_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();

    let server = TestServer::start(config(&dir)).await;
    let mut session = server.session().await;
    for name in ["Can", "Neu!", "Faust"] {
        session.execute("add", vec![band(name)]).await.unwrap();
    }
    session
        .execute("remove-by-id", vec![Frame::Integer(3)])
        .await
        .unwrap();
    let before = session.execute("list", vec![]).await.unwrap();
    server.stop().await;

    let server = TestServer::start(config(&dir)).await;
    let mut session = server.session().await;
    let after = session.execute("list", vec![]).await.unwrap();
    let added = session.execute("add", vec![band("Cluster")]).await.unwrap();

    assert_eq!(before.payload, after.payload);
    // Ids are never reused, not even across restarts.
    assert_eq!(id_of(&added), 4);

    server.stop().await;
}

#[tokio::test]
async fn test_nothing_is_acknowledged_after_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let path = config.data_file.clone();
    let server = TestServer::start(config).await;
    let mut session = server.session().await;
    session.execute("add", vec![band("Can")]).await.unwrap();

    server.stop().await;
    let late = session.execute("add", vec![band("Late")]).await;

    assert!(late.is_err(), "{:?}", late.map(|res| res.status));
    assert_eq!(Store::open(&path).unwrap().read().len(), 1);
}

#[tokio::test]
async fn test_save_command() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let path = config.data_file.clone();
    let server = TestServer::start(config).await;
    let mut session = server.session().await;
    session.execute("add", vec![band("Can")]).await.unwrap();

    let res = session.execute("save", vec![]).await.unwrap();

    assert_eq!(res.status, Status::Ok);
    assert_eq!(Store::open(&path).unwrap().read().len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_script_with_history_and_recursion() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(config(&dir)).await;

    let script = dir.path().join("setup.txt");
    std::fs::write(
        &script,
        format!(
            "# adds two bands\n\
             add name=\"Pink Floyd\" x=1 y=2 participants=5 genre=psychedelic_rock studio=\"Abbey Road\"\n\
             add name=Can x=3 y=4 studio=Cologne\n\
             execute-script \"{}\"\n\
             count\n",
            script.display()
        ),
    )
    .unwrap();

    let mut repl = Repl::new(server.session().await);
    let mut out = Vec::new();
    let flow = repl
        .handle_line(&format!("execute-script {}", script.display()), &mut out)
        .await
        .unwrap();
    let out = String::from_utf8(out).unwrap();

    assert_eq!(flow, Flow::Continue);
    assert!(out.contains("added band #1"), "{}", out);
    assert!(out.contains("added band #2"), "{}", out);
    assert!(out.contains("already running"), "{}", out);
    assert!(out.contains("2 bands"), "{}", out);
    assert_eq!(
        repl.history().collect::<Vec<_>>(),
        vec!["execute-script", "add", "add", "execute-script", "count"]
    );

    let mut out = Vec::new();
    assert_eq!(repl.handle_line("exit", &mut out).await.unwrap(), Flow::Exit);

    server.stop().await;
}
