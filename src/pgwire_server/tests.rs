// Session-level protocol tests: message sequences in, backend messages out. No sockets.

use std::sync::Arc;

use crate::backend::{ColumnDescription, MemoryBackend};
use crate::error::BackendError;
use crate::pgwire_server::messages::{BindMessage, DescribeTarget, FrontendMessage, ParseMessage};
use crate::pgwire_server::send::BackendMessage;
use crate::pgwire_server::session::Session;
use crate::types::{ColumnType, FormatCode, Value};

const SELECT: &str = "SELECT id, status FROM t_order WHERE user_id = $1";
const INSERT: &str = "INSERT INTO t_order (order_id, status) VALUES ($1, $2)";

fn backend() -> MemoryBackend {
    MemoryBackend::new(vec!["ds_0".into(), "ds_1".into()])
        .with_query(
            SELECT,
            vec![ColumnType::Int4],
            vec![ColumnDescription::new("id", ColumnType::Int8), ColumnDescription::new("status", ColumnType::Text)],
            (1..=3).map(|i| vec![Value::Int8(i), Value::from("ok")]).collect(),
        )
        .unwrap()
        .with_update(INSERT, vec![ColumnType::Int8, ColumnType::Text], 1, false)
        .unwrap()
        .with_error("SELECT * FROM missing", BackendError::new("42P01", "relation \"missing\" does not exist"))
        .unwrap()
}

fn session_with(b: MemoryBackend) -> (Session, Arc<MemoryBackend>) {
    let b = Arc::new(b);
    (Session::new(b.clone()), b)
}

fn parse(name: &str, sql: &str) -> FrontendMessage {
    FrontendMessage::Parse(ParseMessage { name: name.into(), sql: sql.into(), param_types: vec![] })
}

fn bind(portal: &str, statement: &str, params: Vec<Option<&str>>, result_formats: Vec<FormatCode>) -> FrontendMessage {
    FrontendMessage::Bind(BindMessage {
        portal: portal.into(),
        statement: statement.into(),
        param_formats: vec![],
        params: params.into_iter().map(|p| p.map(|s| s.as_bytes().to_vec())).collect(),
        result_formats,
    })
}

fn execute(portal: &str, max_rows: i32) -> FrontendMessage { FrontendMessage::Execute { portal: portal.into(), max_rows } }

fn describe_portal(name: &str) -> FrontendMessage { FrontendMessage::Describe { target: DescribeTarget::Portal, name: name.into() } }

fn run(s: &mut Session, msgs: Vec<FrontendMessage>) -> Vec<BackendMessage> { msgs.into_iter().flat_map(|m| s.handle(m)).collect() }

fn tags(msgs: &[BackendMessage]) -> String { msgs.iter().map(|m| m.tag() as char).collect() }

fn error_code(msgs: &[BackendMessage]) -> Option<String> {
    msgs.iter().find_map(|m| match m {
        BackendMessage::ErrorResponse { code, .. } => Some(code.clone()),
        _ => None,
    })
}

#[test]
fn extended_query_round_trip() {
    let (mut s, b) = session_with(backend());
    let out = run(
        &mut s,
        vec![parse("", SELECT), bind("", "", vec![Some("7")], vec![]), describe_portal(""), execute("", 0), FrontendMessage::Sync],
    );
    assert_eq!(tags(&out), "12TDDDCZ");
    assert_eq!(out[3], BackendMessage::DataRow(vec![Some(b"1".to_vec()), Some(b"ok".to_vec())]));
    assert_eq!(out[6], BackendMessage::CommandComplete("SELECT 3".into()));
    assert_eq!(out[7], BackendMessage::ReadyForQuery(b'I'));
    assert_eq!(s.open_portals(), 0);
    assert_eq!(b.open_handles(), 0);
}

#[test]
fn nothing_is_sent_before_sync_or_flush() {
    let (mut s, _) = session_with(backend());
    assert!(s.handle(parse("", SELECT)).is_empty());
    assert!(s.handle(bind("", "", vec![Some("7")], vec![])).is_empty());
    assert_eq!(tags(&s.handle(FrontendMessage::Flush)), "12");
    assert_eq!(tags(&s.handle(FrontendMessage::Sync)), "Z");
}

#[test]
fn describe_statement_reports_parameters_and_columns() {
    let (mut s, _) = session_with(backend());
    let out = run(
        &mut s,
        vec![parse("s1", SELECT), FrontendMessage::Describe { target: DescribeTarget::Statement, name: "s1".into() }, FrontendMessage::Sync],
    );
    assert_eq!(tags(&out), "1tTZ");
    assert_eq!(out[1], BackendMessage::ParameterDescription(vec![23]));
    let BackendMessage::RowDescription(fields) = &out[2] else { panic!("expected RowDescription") };
    assert_eq!(fields.iter().map(|f| f.type_oid).collect::<Vec<_>>(), vec![20, 25]);
    assert!(fields.iter().all(|f| f.format == FormatCode::Text));
    assert_eq!(s.statement_count(), 1);
}

#[test]
fn binary_results_for_every_column() {
    let (mut s, _) = session_with(backend());
    let out = run(&mut s, vec![parse("", SELECT), bind("", "", vec![Some("7")], vec![FormatCode::Binary]), execute("", 1), FrontendMessage::Sync]);
    assert_eq!(tags(&out), "12DsZ");
    assert_eq!(out[2], BackendMessage::DataRow(vec![Some(1i64.to_be_bytes().to_vec()), Some(b"ok".to_vec())]));
}

#[test]
fn suspended_portal_resumes_within_transaction() {
    let (mut s, b) = session_with(backend());
    let begin = run(&mut s, vec![FrontendMessage::Query("BEGIN".into())]);
    assert_eq!(begin, vec![BackendMessage::CommandComplete("BEGIN".into()), BackendMessage::ReadyForQuery(b'T')]);

    let first = run(&mut s, vec![parse("", SELECT), bind("c1", "", vec![Some("7")], vec![]), execute("c1", 2), FrontendMessage::Sync]);
    assert_eq!(tags(&first), "12DDsZ");
    assert_eq!(first.last(), Some(&BackendMessage::ReadyForQuery(b'T')));
    assert_eq!(b.open_handles(), 1);

    let rest = run(&mut s, vec![execute("c1", 2), FrontendMessage::Sync]);
    assert_eq!(tags(&rest), "DCZ");
    assert_eq!(rest[1], BackendMessage::CommandComplete("SELECT 1".into()));

    let commit = run(&mut s, vec![FrontendMessage::Query("COMMIT".into())]);
    assert_eq!(commit.last(), Some(&BackendMessage::ReadyForQuery(b'I')));
    assert_eq!(b.open_handles(), 0);
}

#[test]
fn sync_outside_transaction_closes_portals() {
    let (mut s, b) = session_with(backend());
    let out = run(&mut s, vec![parse("", SELECT), bind("c1", "", vec![Some("7")], vec![]), execute("c1", 1), FrontendMessage::Sync]);
    assert_eq!(tags(&out), "12DsZ");
    assert_eq!(b.open_handles(), 0);
    let out = run(&mut s, vec![execute("c1", 1), FrontendMessage::Sync]);
    assert_eq!(error_code(&out).as_deref(), Some("34000"));
}

fn close_portal(name: &str) -> FrontendMessage { FrontendMessage::Close { target: DescribeTarget::Portal, name: name.into() } }

#[test]
fn execute_after_close_is_an_illegal_state() {
    let (mut s, b) = session_with(backend());
    let out = run(
        &mut s,
        vec![
            parse("", SELECT),
            bind("c1", "", vec![Some("7")], vec![]),
            execute("c1", 1),
            close_portal("c1"),
            execute("c1", 1),
            FrontendMessage::Sync,
        ],
    );
    assert_eq!(tags(&out), "12Ds3EZ");
    assert_eq!(error_code(&out).as_deref(), Some("08P01"));
    assert_eq!(b.open_handles(), 0);
    assert_eq!(s.open_portals(), 0);

    // forgotten once the cycle ends
    let out = run(&mut s, vec![execute("c1", 1), FrontendMessage::Sync]);
    assert_eq!(error_code(&out).as_deref(), Some("34000"));
}

#[test]
fn closed_portal_name_can_be_rebound() {
    let (mut s, b) = session_with(backend());
    run(&mut s, vec![FrontendMessage::Query("BEGIN".into())]);
    let out = run(
        &mut s,
        vec![
            parse("s", SELECT),
            bind("c1", "s", vec![Some("7")], vec![]),
            close_portal("c1"),
            bind("c1", "s", vec![Some("8")], vec![]),
            execute("c1", 0),
            FrontendMessage::Sync,
        ],
    );
    assert_eq!(tags(&out), "1232DDDCZ");
    assert_eq!(out.last(), Some(&BackendMessage::ReadyForQuery(b'T')));
    assert!(s.in_transaction());
    assert_eq!(b.open_handles(), 0);
}

#[test]
fn error_discards_until_sync() {
    let (mut s, _) = session_with(backend());
    let out = run(
        &mut s,
        vec![
            parse("", SELECT),
            bind("", "nope", vec![], vec![]),
            describe_portal(""),
            execute("", 0),
            FrontendMessage::Sync,
        ],
    );
    assert_eq!(tags(&out), "1EZ");
    assert_eq!(error_code(&out).as_deref(), Some("26000"));

    // the session is usable again after Sync
    let out = run(&mut s, vec![bind("", "", vec![Some("1")], vec![]), execute("", 0), FrontendMessage::Sync]);
    assert_eq!(tags(&out), "2DDDCZ");
}

#[test]
fn backend_error_keeps_its_sqlstate() {
    let (mut s, _) = session_with(backend());
    let out = run(&mut s, vec![FrontendMessage::Query("SELECT * FROM missing".into())]);
    assert_eq!(tags(&out), "EZ");
    let BackendMessage::ErrorResponse { code, message, .. } = &out[0] else { panic!("expected ErrorResponse") };
    assert_eq!(code, "42P01");
    assert_eq!(message, "relation \"missing\" does not exist");
}

#[test]
fn malformed_parameter_is_a_data_error() {
    let (mut s, _) = session_with(backend());
    let out = run(&mut s, vec![parse("", SELECT), bind("", "", vec![Some("seven")], vec![]), execute("", 0), FrontendMessage::Sync]);
    assert_eq!(tags(&out), "1EZ");
    assert_eq!(error_code(&out).as_deref(), Some("22P02"));
}

#[test]
fn parameter_count_mismatch_is_rejected() {
    let (mut s, _) = session_with(backend());
    let out = run(&mut s, vec![parse("", SELECT), bind("", "", vec![], vec![]), FrontendMessage::Sync]);
    assert_eq!(error_code(&out).as_deref(), Some("08P01"));
}

#[test]
fn duplicate_named_portal_and_statement() {
    let (mut s, _) = session_with(backend());
    let out = run(
        &mut s,
        vec![FrontendMessage::Query("BEGIN".into()), parse("s", SELECT), bind("p", "s", vec![Some("1")], vec![]), bind("p", "s", vec![Some("2")], vec![]), FrontendMessage::Sync],
    );
    assert_eq!(error_code(&out).as_deref(), Some("42P03"));

    let out = run(&mut s, vec![parse("s", SELECT), FrontendMessage::Sync]);
    assert_eq!(error_code(&out).as_deref(), Some("42P05"));

    let out = run(
        &mut s,
        vec![FrontendMessage::Close { target: DescribeTarget::Statement, name: "s".into() }, parse("s", SELECT), FrontendMessage::Sync],
    );
    assert_eq!(tags(&out), "31Z");
}

#[test]
fn simple_query_flow() {
    let (mut s, _) = session_with(backend().with_query("SELECT 1", vec![], vec![ColumnDescription::new("?column?", ColumnType::Int4)], vec![vec![Value::Int4(1)]]).unwrap());
    let out = run(&mut s, vec![FrontendMessage::Query("SELECT 1".into())]);
    assert_eq!(tags(&out), "TDCZ");
    assert_eq!(out[1], BackendMessage::DataRow(vec![Some(b"1".to_vec())]));

    let out = run(&mut s, vec![FrontendMessage::Query("  ;".into())]);
    assert_eq!(out, vec![BackendMessage::EmptyQueryResponse, BackendMessage::ReadyForQuery(b'I')]);

    let out = run(&mut s, vec![FrontendMessage::Query("SET application_name = 'psql'".into())]);
    assert_eq!(tags(&out), "CSZ");
}

#[test]
fn pipelined_inserts_are_batched() {
    let (mut s, b) = session_with(backend());
    let mut msgs = vec![parse("ins", INSERT)];
    for id in 1..=4 {
        let id = id.to_string();
        msgs.push(bind("", "ins", vec![Some(id.as_str()), Some("init")], vec![]));
        msgs.push(describe_portal(""));
        msgs.push(execute("", 0));
    }
    msgs.push(FrontendMessage::Sync);
    let out = run(&mut s, msgs);
    assert_eq!(tags(&out), "12nC2nC2nC2nCZ");
    let completions: Vec<_> = out.iter().filter(|m| m.tag() == b'C').cloned().collect();
    assert!(completions.iter().all(|m| *m == BackendMessage::CommandComplete("INSERT 0 1".into())));

    let batches = b.executed_batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches.iter().map(|u| u.param_sets.len()).sum::<usize>(), 4);
    assert!(b.executed_updates().is_empty());
}

#[test]
fn batch_failure_is_one_error() {
    let (mut s, _) = session_with(backend().with_failing_destination(INSERT, "ds_0").unwrap());
    let out = run(
        &mut s,
        vec![
            parse("ins", INSERT),
            bind("", "ins", vec![Some("1"), Some("a")], vec![]),
            execute("", 0),
            bind("", "ins", vec![Some("2"), Some("b")], vec![]),
            execute("", 0),
            FrontendMessage::Sync,
        ],
    );
    assert_eq!(tags(&out), "1EZ");
    assert_eq!(error_code(&out).as_deref(), Some("08006"));
}

#[test]
fn single_insert_is_not_batched() {
    let (mut s, b) = session_with(backend());
    let out = run(&mut s, vec![parse("", INSERT), bind("", "", vec![Some("1"), Some("a")], vec![]), execute("", 0), FrontendMessage::Sync]);
    assert_eq!(tags(&out), "12CZ");
    assert_eq!(out[2], BackendMessage::CommandComplete("INSERT 0 1".into()));
    assert!(b.executed_batches().is_empty());
    assert_eq!(b.executed_updates().len(), 1);
}

#[test]
fn decode_failure_enters_error_state() {
    let (mut s, _) = session_with(backend());
    let err = FrontendMessage::decode(b'?', &[]).unwrap_err();
    let out = s.protocol_error(&err);
    assert_eq!(tags(&out), "E");
    assert!(s.handle(execute("", 0)).is_empty());
    assert_eq!(tags(&s.handle(FrontendMessage::Sync)), "Z");
}

#[test]
fn terminate_releases_everything() {
    let (mut s, b) = session_with(backend());
    run(&mut s, vec![FrontendMessage::Query("BEGIN".into())]);
    run(&mut s, vec![parse("s", SELECT), bind("p", "s", vec![Some("1")], vec![]), FrontendMessage::Flush]);
    assert_eq!(b.open_handles(), 1);
    assert!(s.handle(FrontendMessage::Terminate).is_empty());
    assert_eq!(b.open_handles(), 0);
    assert_eq!(s.statement_count(), 0);
}

#[test]
fn cancel_applies_only_to_running_cycle() {
    use crate::pgwire_server::cancel::request_cancel;

    let (mut s, b) = session_with(backend());
    // raised while idle: stale, ignored by the next cycle
    assert!(request_cancel(s.process_id(), s.secret_key()));
    let out = run(&mut s, vec![parse("", SELECT), bind("", "", vec![Some("7")], vec![]), execute("", 0), FrontendMessage::Sync]);
    assert_eq!(tags(&out), "12DDDCZ");

    assert!(s.handle(parse("", SELECT)).is_empty());
    assert!(s.handle(bind("", "", vec![Some("7")], vec![])).is_empty());
    assert!(request_cancel(s.process_id(), s.secret_key()));
    assert!(s.handle(execute("", 0)).is_empty());
    let out = s.handle(FrontendMessage::Sync);
    assert_eq!(tags(&out), "12EZ");
    assert_eq!(error_code(&out).as_deref(), Some("57014"));
    assert_eq!(b.open_handles(), 0);
}
