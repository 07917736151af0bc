//! End-to-end checks against a private PostgreSQL cluster.

#![expect(
    clippy::expect_used,
    reason = "test code uses expect for clear failure messages"
)]

mod support;

use std::sync::Arc;

use pg_services::{
    CommandRunner, Invocation, ReadinessChecker, SystemRunner, scratch_database_name,
    template_database_name,
};
use support::local_session;

#[test]
fn session_serves_queries_and_cleans_up() {
    let Some(session) = local_session() else {
        return;
    };
    let data_dir = session.data_dir().expect("local data dir").to_owned();

    assert_eq!(session.host(), data_dir.as_str());
    assert!(session.checker("postgres").is_ready());
    assert!(!session.checker("no-such-database").is_ready());

    drop(session);
    assert!(!data_dir.exists());
}

#[test]
fn checker_is_false_without_a_server() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let host = tmp.path().to_string_lossy().into_owned();
    let checker = ReadinessChecker::new(Arc::new(SystemRunner::new()), host);

    assert!(!checker.is_ready());
}

#[test]
fn template_is_created_once_and_reused() {
    let Some(session) = local_session() else {
        return;
    };
    let cache = session.template_cache();

    let name = session.default_template().expect("default template");
    assert_eq!(
        name,
        "pytest-services-template-1425fb5b3fe9188c08adefcccfee0d22"
    );
    assert!(cache.database_exists(&name));
    assert!(!cache.database_exists(&scratch_database_name(&name)));

    let script = session
        .write_setup_sql("CREATE TABLE example (x int)")
        .expect("script");
    assert_eq!(cache.ensure_template(&script).expect("cache hit"), name);

    let other = session
        .write_setup_sql("CREATE TABLE other (y text)")
        .expect("script");
    let other_name = cache.ensure_template(&other).expect("second template");
    assert_ne!(other_name, name);
    assert!(cache.database_exists(&other_name));
}

#[test]
fn leftover_scratch_database_does_not_block_creation() {
    let Some(session) = local_session() else {
        return;
    };
    let sql = "CREATE TABLE leftover (id int)";
    let name = template_database_name(sql.as_bytes());
    let runner = SystemRunner::new();
    let created = runner
        .run(&Invocation::new("createdb").args([
            "-h",
            session.host(),
            scratch_database_name(&name).as_str(),
        ]))
        .expect("createdb runs");
    assert!(created.success(), "stale scratch db: {}", created.stderr);

    let script = session.write_setup_sql(sql).expect("script");
    let ensured = session
        .template_cache()
        .ensure_template(&script)
        .expect("template despite leftover");

    assert_eq!(ensured, name);
}

#[test]
fn running_database_is_a_usable_clone() {
    let Some(session) = local_session() else {
        return;
    };
    let cache = session.template_cache();
    let template = session.default_template().expect("template");

    let running = cache.create_running_database(&template).expect("clone");
    let runner = SystemRunner::new();
    let output = runner
        .run(&Invocation::new("psql").args([
            "-h",
            session.host(),
            "-c",
            "SELECT count(*) FROM example;",
            "-t",
            "-A",
            running.as_str(),
        ]))
        .expect("psql runs");

    assert!(output.success(), "query failed: {}", output.stderr);
    assert_eq!(output.stdout.trim(), "0");

    cache.drop_database(&running).expect("drop clone");
    assert!(!cache.database_exists(&running));
}
