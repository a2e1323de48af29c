use std::net::SocketAddr;
use std::time::Duration;

use securefill::listener::ScanListener;
use securefill::protocol::{Action, ActionPlan, ActionType, ActionValue, BrowserCommand, Command};
use securefill::relay::HostRelay;
use securefill::wire;
use serde_json::json;
use tokio::io::{AsyncRead, duplex};

const WAIT: Duration = Duration::from_secs(5);

fn any_port() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn next_browser_command<R: AsyncRead + Unpin>(stdout: &mut R) -> BrowserCommand {
    let body = tokio::time::timeout(WAIT, wire::read_frame(stdout))
        .await
        .expect("frame written to the browser")
        .unwrap()
        .expect("pipe still open");
    wire::decode(&body).unwrap()
}

#[tokio::test]
async fn scan_results_reach_the_orchestrator() {
    let orchestrator = ScanListener::bind(any_port()).unwrap();
    let relay = HostRelay::bind(any_port(), orchestrator.local_addr().unwrap()).unwrap();

    let (mut browser, host_stdin) = duplex(64 * 1024);
    let (host_stdout, _browser_out) = duplex(64 * 1024);
    tokio::spawn(relay.run(host_stdin, host_stdout));

    let fields = json!([{"selector": "#name", "html": "<input id=\"name\">"}]);
    wire::write_frame(&mut browser, &json!({"action": "page_loaded"}))
        .await
        .unwrap();
    wire::write_frame(
        &mut browser,
        &json!({"action": "contextual_scan_result", "data": fields}),
    )
    .await
    .unwrap();

    let received = tokio::time::timeout(WAIT, orchestrator.accept_once())
        .await
        .expect("scan result forwarded");
    assert_eq!(json!(received), fields);
}

#[tokio::test]
async fn scan_data_is_forwarded_byte_for_byte() {
    let orchestrator = wire::bind_reusable(any_port()).unwrap();
    let relay = HostRelay::bind(any_port(), orchestrator.local_addr().unwrap()).unwrap();

    let (mut browser, host_stdin) = duplex(64 * 1024);
    let (host_stdout, _browser_out) = duplex(64 * 1024);
    tokio::spawn(relay.run(host_stdin, host_stdout));

    let data = r##"[{"selector":"#total","value":1.0715660391465826e-75,"html":"<input id=\"total\">"},{"z":1,"a":2}]"##;
    let body = format!(r#"{{"action":"contextual_scan_result","data":{data}}}"#);
    let mut frame = (body.len() as u32).to_ne_bytes().to_vec();
    frame.extend_from_slice(body.as_bytes());
    tokio::io::AsyncWriteExt::write_all(&mut browser, &frame)
        .await
        .unwrap();

    let received = tokio::time::timeout(WAIT, async {
        let (mut stream, _) = orchestrator.accept().await.unwrap();
        wire::read_document(&mut stream).await.unwrap()
    })
    .await
    .expect("scan result forwarded");
    assert_eq!(String::from_utf8(received).unwrap(), data);
}

#[tokio::test]
async fn commands_are_written_to_the_browser() {
    let relay = HostRelay::bind(any_port(), any_port()).unwrap();
    let command_addr = relay.local_addr().unwrap();

    let (_browser, host_stdin) = duplex(64 * 1024);
    let (host_stdout, mut browser_out) = duplex(64 * 1024);
    tokio::spawn(relay.run(host_stdin, host_stdout));

    wire::send_document(command_addr, &Command::Scan).await.unwrap();
    assert_eq!(
        next_browser_command(&mut browser_out).await,
        BrowserCommand::ScanPage
    );

    let plan = ActionPlan::new(vec![Action::new(
        "#name",
        ActionType::FillText,
        ActionValue::Text("Ada".into()),
    )]);
    wire::send_document(command_addr, &Command::ExecutePlan { payload: plan.clone() })
        .await
        .unwrap();
    assert_eq!(
        next_browser_command(&mut browser_out).await,
        BrowserCommand::ExecuteActionPlan { plan }
    );
}

#[tokio::test]
async fn malformed_command_does_not_stop_the_relay() {
    let relay = HostRelay::bind(any_port(), any_port()).unwrap();
    let command_addr = relay.local_addr().unwrap();

    let (_browser, host_stdin) = duplex(64 * 1024);
    let (host_stdout, mut browser_out) = duplex(64 * 1024);
    tokio::spawn(relay.run(host_stdin, host_stdout));

    wire::send_document(command_addr, &json!({"command": "reboot"}))
        .await
        .unwrap();
    wire::send_document(command_addr, "not a command").await.unwrap();
    wire::send_document(command_addr, &Command::Scan).await.unwrap();

    assert_eq!(
        next_browser_command(&mut browser_out).await,
        BrowserCommand::ScanPage
    );
}

#[tokio::test]
async fn malformed_browser_message_is_skipped() {
    let orchestrator = ScanListener::bind(any_port()).unwrap();
    let relay = HostRelay::bind(any_port(), orchestrator.local_addr().unwrap()).unwrap();

    let (mut browser, host_stdin) = duplex(64 * 1024);
    let (host_stdout, _browser_out) = duplex(64 * 1024);
    tokio::spawn(relay.run(host_stdin, host_stdout));

    // valid frame, invalid JSON body
    let garbage = b"{oops";
    let mut frame = (garbage.len() as u32).to_ne_bytes().to_vec();
    frame.extend_from_slice(garbage);
    tokio::io::AsyncWriteExt::write_all(&mut browser, &frame)
        .await
        .unwrap();

    wire::write_frame(
        &mut browser,
        &json!({"action": "contextual_scan_result", "data": [{"selector": "#a"}]}),
    )
    .await
    .unwrap();

    let received = tokio::time::timeout(WAIT, orchestrator.accept_once())
        .await
        .expect("relay still forwarding");
    assert_eq!(received, vec![json!({"selector": "#a"})]);
}

#[tokio::test]
async fn relay_ends_when_the_browser_closes_stdin() {
    let relay = HostRelay::bind(any_port(), any_port()).unwrap();
    let (browser, host_stdin) = duplex(1024);
    let (host_stdout, _browser_out) = duplex(1024);
    let running = tokio::spawn(relay.run(host_stdin, host_stdout));

    drop(browser);
    let result = tokio::time::timeout(WAIT, running)
        .await
        .expect("relay stopped")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn scan_result_is_dropped_when_orchestrator_is_down() {
    let orchestrator: SocketAddr = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap()
    };
    let relay = HostRelay::bind(any_port(), orchestrator).unwrap();
    let command_addr = relay.local_addr().unwrap();

    let (mut browser, host_stdin) = duplex(64 * 1024);
    let (host_stdout, mut browser_out) = duplex(64 * 1024);
    tokio::spawn(relay.run(host_stdin, host_stdout));

    wire::write_frame(
        &mut browser,
        &json!({"action": "contextual_scan_result", "data": []}),
    )
    .await
    .unwrap();

    // still serving commands afterwards
    wire::send_document(command_addr, &Command::Scan).await.unwrap();
    assert_eq!(
        next_browser_command(&mut browser_out).await,
        BrowserCommand::ScanPage
    );
}
