//! Kerberized HDFS scenario suite
//!
//! Each scenario receives the shared cluster through its [`Scenario`]
//! driver and leaves the cluster healthy for the next one.

use super::assertions::{AssertionResult, ErrorExpectation};
use super::cluster::ClusterHandle;
use super::error::{EngineErrorKind, ErrorKind, HarnessError, HarnessResult};
use super::report::{ScenarioReport, SuiteReport};
use super::scenario::{FaultInjection, Phase, Scenario, ScenarioContext};

/// Column layout shared by every table in the suite
const COLUMNS: &str = "id UInt32, name String, weight Float64";

/// A registered scenario
#[derive(Debug, Clone, Copy)]
pub struct ScenarioInfo {
    pub name: &'static str,
    pub description: &'static str,
}

pub const SCENARIOS: &[ScenarioInfo] = &[
    ScenarioInfo {
        name: "read_table",
        description: "oracle write, oracle read, and table function read agree",
    },
    ScenarioInfo {
        name: "read_write_storage",
        description: "insert through an HDFS table and read it back both ways",
    },
    ScenarioInfo {
        name: "write_storage_expired",
        description: "insert after ticket expiry succeeds through lazy relogin",
    },
    ScenarioInfo {
        name: "prohibited",
        description: "a user principal cannot write outside its home directory",
    },
    ScenarioInfo {
        name: "two_users",
        description: "two principals write disjoint paths without interference",
    },
    ScenarioInfo {
        name: "cache_path",
        description: "a per-user ticket cache path is rejected",
    },
    ScenarioInfo {
        name: "read_table_not_expired",
        description: "reads fail while the KDC is paused and recover after unpause",
    },
];

/// Resolve a scenario by name or 1-based position
pub fn find_scenario(selector: &str) -> HarnessResult<&'static ScenarioInfo> {
    if let Ok(index) = selector.parse::<usize>() {
        if let Some(info) = index.checked_sub(1).and_then(|i| SCENARIOS.get(i)) {
            return Ok(info);
        }
    }
    SCENARIOS
        .iter()
        .find(|info| info.name == selector)
        .ok_or_else(|| {
            HarnessError::config(format!(
                "unknown scenario '{}'; expected 1..={} or one of: {}",
                selector,
                SCENARIOS.len(),
                SCENARIOS
                    .iter()
                    .map(|info| info.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
}

/// Run one scenario against `cluster`
pub async fn run_scenario(
    name: &str,
    cluster: &ClusterHandle,
    ctx: &ScenarioContext,
) -> HarnessResult<ScenarioReport> {
    let info = find_scenario(name)?;
    log::info!("=== scenario {} ===", info.name);

    let mut scenario = Scenario::new(info.name, cluster, ctx);
    let outcome = match info.name {
        "read_table" => read_table(&mut scenario).await,
        "read_write_storage" => read_write_storage(&mut scenario).await,
        "write_storage_expired" => write_storage_expired(&mut scenario).await,
        "prohibited" => prohibited(&mut scenario).await,
        "two_users" => two_users(&mut scenario).await,
        "cache_path" => cache_path(&mut scenario).await,
        "read_table_not_expired" => read_table_not_expired(&mut scenario).await,
        other => Err(HarnessError::config(format!("scenario '{}' has no body", other))),
    };
    scenario.teardown().await;
    Ok(scenario.finish(outcome))
}

/// Run the selected scenarios (all when `selection` is empty) in order
pub async fn run_suite(
    cluster: &ClusterHandle,
    ctx: &ScenarioContext,
    selection: &[String],
) -> HarnessResult<SuiteReport> {
    let names: Vec<&str> = if selection.is_empty() {
        SCENARIOS.iter().map(|info| info.name).collect()
    } else {
        selection
            .iter()
            .map(|s| find_scenario(s).map(|info| info.name))
            .collect::<HarnessResult<_>>()?
    };

    let mut report = SuiteReport::new(cluster.run_id(), cluster.backend_name());
    for name in names {
        report.scenarios.push(run_scenario(name, cluster, ctx).await?);
    }
    report.finish();
    Ok(report)
}

fn permission_denied() -> ErrorExpectation {
    ErrorExpectation::kind(ErrorKind::Engine(EngineErrorKind::PermissionDenied))
}

async fn read_table(s: &mut Scenario<'_>) -> HarnessResult<()> {
    let data = "1\tSerialize\t555.222\n2\tData\t777.333\n";
    let path = "/simple_table_function";
    let uri = s.config().hdfs_uri(path);

    s.enter(Phase::Setup)?;
    s.write_data(path, data).await?;

    s.enter(Phase::Act)?;
    let api_read = s.read_data(path).await?;
    let selected = s
        .query(&format!(
            "SELECT * FROM hdfs('{}', 'TSV', '{}')",
            uri, COLUMNS
        ))
        .await?;

    s.enter(Phase::Verify)?;
    s.verify_exact("oracle read", data, &api_read)?;
    s.verify_exact("table function read", data, &selected)
}

async fn read_write_storage(s: &mut Scenario<'_>) -> HarnessResult<()> {
    let expected = "1\tMark\t72.53\n";
    let path = "/simple_storage1";
    let uri = s.config().hdfs_uri(path);

    s.enter(Phase::Setup)?;
    s.query(&format!(
        "CREATE TABLE SimpleHDFSStorage2 ({}) ENGINE = HDFS('{}', 'TSV')",
        COLUMNS, uri
    ))
    .await?;

    s.enter(Phase::Act)?;
    s.query("INSERT INTO SimpleHDFSStorage2 VALUES (1, 'Mark', 72.53)")
        .await?;

    s.enter(Phase::Verify)?;
    let api_read = s.read_data(path).await?;
    s.verify_exact("oracle read", expected, &api_read)?;
    let selected = s.query("SELECT * FROM SimpleHDFSStorage2").await?;
    s.verify_exact("select", expected, &selected)
}

async fn write_storage_expired(s: &mut Scenario<'_>) -> HarnessResult<()> {
    let expected = "1\tMark\t72.53\n";
    let path = "/simple_storage_expired";
    let uri = s.config().hdfs_uri(path);

    s.enter(Phase::Setup)?;
    s.query(&format!(
        "CREATE TABLE SimpleHDFSStorageExpired ({}) ENGINE = HDFS('{}', 'TSV')",
        COLUMNS, uri
    ))
    .await?;

    s.enter(Phase::FaultInject)?;
    s.inject(FaultInjection::ExpireCredentials).await?;

    s.enter(Phase::Reverify)?;
    s.query("INSERT INTO SimpleHDFSStorageExpired VALUES (1, 'Mark', 72.53)")
        .await?;
    let api_read = s.read_data(path).await?;
    s.verify_exact("oracle read", expected, &api_read)?;
    let selected = s.query("SELECT * FROM SimpleHDFSStorageExpired").await?;
    s.verify_exact("select", expected, &selected)
}

async fn prohibited(s: &mut Scenario<'_>) -> HarnessResult<()> {
    let path = "/storage_user_two_prohibited";
    let uri = s.config().hdfs_uri_as("suser", path);

    s.enter(Phase::Setup)?;
    s.query(&format!(
        "CREATE TABLE HDFSStorTwoProhibited ({}) ENGINE = HDFS('{}', 'TSV')",
        COLUMNS, uri
    ))
    .await?;

    s.enter(Phase::Act)?;
    let outcome = s
        .query("INSERT INTO HDFSStorTwoProhibited VALUES (1, 'SomeOne', 74.00)")
        .await;

    s.enter(Phase::Verify)?;
    s.verify_error(
        &outcome,
        &permission_denied()
            .containing(format!("Unable to open HDFS file: {}", path))
            .containing("user=specuser")
            .containing("access=WRITE"),
    )?;
    let written = s.data_exists(path).await?;
    s.verify(if written {
        AssertionResult::fail("no_partial_write", "denied write left a file behind", "absent", path)
    } else {
        AssertionResult::pass("no_partial_write", "denied write left nothing behind")
    })
}

async fn two_users(s: &mut Scenario<'_>) -> HarnessResult<()> {
    let path_one = "/storage_user_one";
    let path_two = "/user/specuser/storage_user_two";
    let uri_one = s.config().hdfs_uri(path_one);
    let uri_two = s.config().hdfs_uri_as("suser", path_two);

    s.enter(Phase::Setup)?;
    s.query(&format!(
        "CREATE TABLE HDFSStorOne ({}) ENGINE = HDFS('{}', 'TSV')",
        COLUMNS, uri_one
    ))
    .await?;
    s.query(&format!(
        "CREATE TABLE HDFSStorTwo ({}) ENGINE = HDFS('{}', 'TSV')",
        COLUMNS, uri_two
    ))
    .await?;

    s.enter(Phase::Act)?;
    s.query("INSERT INTO HDFSStorOne VALUES (1, 'IlyaReal', 86.00)")
        .await?;
    s.query("INSERT INTO HDFSStorTwo VALUES (1, 'IlyaIdeal', 74.00)")
        .await?;

    // Cross reads: each identity reads the file the other one wrote.
    let default_reads_two = s
        .query(&format!(
            "SELECT * FROM hdfs('{}', 'TSV', '{}')",
            s.config().hdfs_uri(path_two),
            COLUMNS
        ))
        .await?;
    let suser_reads_one = s
        .query(&format!(
            "SELECT * FROM hdfs('{}', 'TSV', '{}')",
            s.config().hdfs_uri_as("suser", path_one),
            COLUMNS
        ))
        .await?;

    s.enter(Phase::Verify)?;
    s.verify_exact("default principal reads user two", "1\tIlyaIdeal\t74\n", &default_reads_two)?;
    s.verify_exact("suser reads user one", "1\tIlyaReal\t86\n", &suser_reads_one)?;

    // The default principal does not own the second user's home directory.
    let intruder_path = "/user/specuser/storage_user_two_intruder";
    s.enter(Phase::Act)?;
    s.query(&format!(
        "CREATE TABLE HDFSStorTwoIntruder ({}) ENGINE = HDFS('{}', 'TSV')",
        COLUMNS,
        s.config().hdfs_uri(intruder_path)
    ))
    .await?;
    let outcome = s
        .query("INSERT INTO HDFSStorTwoIntruder VALUES (2, 'Intruder', 1.5)")
        .await;

    s.enter(Phase::Verify)?;
    s.verify_error(
        &outcome,
        &permission_denied()
            .containing(intruder_path)
            .containing("user=root")
            .containing("access=WRITE"),
    )?;
    let second = s.read_data(path_two).await?;
    s.verify_exact("user two file untouched", "1\tIlyaIdeal\t74\n", &second)
}

async fn cache_path(s: &mut Scenario<'_>) -> HarnessResult<()> {
    let uri = s
        .config()
        .hdfs_uri_as("dedicatedcachepath", "/storage_dedicated_cache_path");

    s.enter(Phase::Setup)?;
    s.query(&format!(
        "CREATE TABLE HDFSStorCachePath ({}) ENGINE = HDFS('{}', 'TSV')",
        COLUMNS, uri
    ))
    .await?;

    s.enter(Phase::Act)?;
    let outcome = s
        .query("INSERT INTO HDFSStorCachePath VALUES (1, 'FatMark', 92.53)")
        .await;

    s.enter(Phase::Verify)?;
    s.verify_error(
        &outcome,
        &ErrorExpectation::kind(ErrorKind::Engine(EngineErrorKind::ConfigurationConflict))
            .containing("hadoop.security.kerberos.ticket.cache.path cannot be set per user"),
    )
}

async fn read_table_not_expired(s: &mut Scenario<'_>) -> HarnessResult<()> {
    let data = "1\tCaching\t888.222\n2\tWork\t999.333\n";
    let path = "/simple_table_function_relogin";
    let select = format!(
        "SELECT * FROM hdfs('{}', 'TSV', '{}')",
        s.config().hdfs_uri(path),
        COLUMNS
    );
    let kdc = s.config().kdc.name.clone();

    s.enter(Phase::Setup)?;
    s.write_data(path, data).await?;

    s.enter(Phase::Act)?;
    let before = s.query(&select).await?;

    s.enter(Phase::Verify)?;
    s.verify_exact("read before fault", data, &before)?;

    s.enter(Phase::FaultInject)?;
    s.inject(FaultInjection::PauseContainer(kdc.clone())).await?;
    s.inject(FaultInjection::ExpireCredentials).await?;

    s.enter(Phase::Reverify)?;
    let outcome = s.query(&select).await;
    s.verify_error(
        &outcome,
        &ErrorExpectation::kind(ErrorKind::Engine(EngineErrorKind::KerberosInitFailure))
            .containing("kinit failure:"),
    )?;

    s.enter(Phase::FaultInject)?;
    s.inject(FaultInjection::UnpauseContainer(kdc)).await?;

    s.enter(Phase::Reverify)?;
    let after = s.query(&select).await?;
    s.verify_exact("read after unpause", data, &after)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_by_name_and_position() {
        assert_eq!(find_scenario("prohibited").unwrap().name, "prohibited");
        assert_eq!(find_scenario("1").unwrap().name, "read_table");
        assert_eq!(find_scenario("7").unwrap().name, "read_table_not_expired");
    }

    #[test]
    fn test_find_unknown() {
        let err = find_scenario("8").unwrap_err();
        assert!(err.to_string().contains("unknown scenario '8'"));
        assert!(find_scenario("zero").is_err());
    }

    #[test]
    fn test_scenario_names_unique() {
        let mut names: Vec<_> = SCENARIOS.iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), SCENARIOS.len());
    }
}
