#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const SAMPLE_STACK: &str = r#"
region: us-east-1
vpcCidrBlock: 10.0.0.0/16
vpcName: main-vpc
internetGatewayName: main-igw
publicRouteTableName: public-rt
privateRouteTableName: private-rt
publicSubnetsName: public-subnet-
privateSubnetsName: private-subnet-
publicSubnetAssoName: public-assoc-
privateSubnetAssoName: private-assoc-
destinationCidrBlock: 0.0.0.0/0
amiId: ami-0123456789abcdef0
keyName: deploy-key
dbUsername: app
dbPassword: s3cr3t-pass
hostedZoneId: Z0123456789
domainName: app.example.com
certificateArn: arn:aws:acm:us-east-1:123456789012:certificate/abc
snsTopicName: app-events
lambdaEnv:
  STAGE: test
  API_TOKEN: tok-123
"#;

fn write_stack(dir: &Path, content: &str) {
    fs::write(dir.join("tierflow.yaml"), content).unwrap();
}

/// 一時ディレクトリをカレントにし、外部の設定に影響されないコマンド
fn tierflow(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tierflow").unwrap();
    cmd.current_dir(dir)
        .env_remove("TIERFLOW_CONFIG_PATH")
        .env_remove("TIERFLOW_STATE_DIR")
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir.join(".config"))
        .env("NO_COLOR", "1");
    cmd
}

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("tierflow").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("依存関係の順に構築する"))
        .stdout(predicate::str::contains("topology"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("destroy"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("tierflow").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tierflow"));
}

/// destroyコマンドのヘルプに --yes が含まれることを確認
#[test]
fn test_destroy_help() {
    let mut cmd = Command::cargo_bin("tierflow").unwrap();
    cmd.arg("destroy")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"));
}

/// 不正なコマンドでエラーになることを確認
#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("tierflow").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

/// スタックファイルがない場合に validate が失敗することを確認
#[test]
fn test_validate_without_stack_file() {
    let temp = TempDir::new().unwrap();
    tierflow(temp.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("スタックファイルが見つかりません"));
}

/// 必須キーの不足が報告されることを確認
#[test]
fn test_validate_reports_missing_keys() {
    let temp = TempDir::new().unwrap();
    write_stack(temp.path(), "region: us-east-1\nvpcCidrBlock: 10.0.0.0/16\n");

    tierflow(temp.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("設定エラー"))
        .stderr(predicate::str::contains("vpcName"))
        .stderr(predicate::str::contains("dbPassword"));
}

#[test]
fn test_validate_sample_stack() {
    let temp = TempDir::new().unwrap();
    write_stack(temp.path(), SAMPLE_STACK);

    tierflow(temp.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("設定ファイルは正常です"))
        .stdout(predicate::str::contains("us-east-1"))
        .stdout(predicate::str::contains("s3cr3t-pass").not());
}

#[test]
fn test_topology_lists_subnets() {
    let temp = TempDir::new().unwrap();
    write_stack(temp.path(), SAMPLE_STACK);

    tierflow(temp.path())
        .arg("topology")
        .assert()
        .success()
        .stdout(predicate::str::contains("public-subnet-0"))
        .stdout(predicate::str::contains("10.0.0.0/24"))
        .stdout(predicate::str::contains("private-subnet-2"))
        .stdout(predicate::str::contains("10.0.5.0/24"));
}

#[test]
fn test_topology_json() {
    let temp = TempDir::new().unwrap();
    write_stack(temp.path(), SAMPLE_STACK);

    let output = tierflow(temp.path())
        .args(["topology", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let topology: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(topology["subnets"].as_array().unwrap().len(), 6);
    assert_eq!(topology["zones"][0], "us-east-1a");
}

/// アドレス空間が足りない場合は何も作らずに失敗する
#[test]
fn test_apply_fails_on_insufficient_address_space() {
    let temp = TempDir::new().unwrap();
    let stack = SAMPLE_STACK.replace("10.0.0.0/16", "10.0.0.0/24") + "subnetPrefixLength: 24\n";
    write_stack(temp.path(), &stack);

    tierflow(temp.path())
        .arg("apply")
        .assert()
        .failure()
        .stderr(predicate::str::contains("address space"));

    assert!(!temp.path().join(".tierflow").join("state.json").exists());
}

#[test]
fn test_apply_plan_destroy_lifecycle() {
    let temp = TempDir::new().unwrap();
    write_stack(temp.path(), SAMPLE_STACK);

    tierflow(temp.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("構築順序"))
        .stdout(predicate::str::contains("main-vpc"));

    let output = tierflow(temp.path())
        .args(["apply", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["succeeded"].as_array().unwrap().len(), 35);
    assert!(report["failed"].as_array().unwrap().is_empty());
    assert!(!String::from_utf8_lossy(&output.stdout).contains("s3cr3t-pass"));
    assert!(temp.path().join(".tierflow").join("state.json").exists());
    assert!(!temp.path().join(".tierflow").join("lock.json").exists());

    tierflow(temp.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("スタックは最新です"));

    // --yes なしでは何も削除しない
    tierflow(temp.path())
        .arg("destroy")
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"));

    let output = tierflow(temp.path())
        .args(["destroy", "--yes", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["operation"], "destroy");
    assert_eq!(report["succeeded"].as_array().unwrap().len(), 35);
}

#[test]
fn test_state_dir_option() {
    let temp = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    write_stack(temp.path(), SAMPLE_STACK);

    tierflow(temp.path())
        .arg("--state-dir")
        .arg(state.path())
        .arg("apply")
        .assert()
        .success()
        .stdout(predicate::str::contains("35個のリソースを構築しました"));

    assert!(state.path().join(".tierflow").join("state.json").exists());
    assert!(!temp.path().join(".tierflow").join("state.json").exists());
}

/// 巨大なゾーン上限でもブロックを列挙せずに検証できる
#[test]
fn test_validate_huge_zone_cap() {
    let temp = TempDir::new().unwrap();
    write_stack(temp.path(), &(SAMPLE_STACK.to_string() + "zoneCap: 100000000000\n"));

    tierflow(temp.path())
        .arg("validate")
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .failure()
        .stderr(predicate::str::contains("ネットワーク構成エラー"))
        .stderr(predicate::str::contains("200000000000"));
}

/// ゾーン上限を下げると3つ目のゾーンのリソースが削除される
#[test]
fn test_lowering_zone_cap_prunes_third_zone() {
    let temp = TempDir::new().unwrap();
    write_stack(temp.path(), SAMPLE_STACK);
    tierflow(temp.path()).arg("apply").assert().success();

    write_stack(temp.path(), &(SAMPLE_STACK.to_string() + "zoneCap: 2\n"));
    tierflow(temp.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("削除: 4"))
        .stdout(predicate::str::contains("public-subnet-2"));

    let output = tierflow(temp.path())
        .args(["apply", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["pruned"].as_array().unwrap().len(), 4);

    let state = fs::read_to_string(temp.path().join(".tierflow").join("state.json")).unwrap();
    assert!(!state.contains("public-subnet-2"));
    assert!(!state.contains("private-assoc-2"));
    assert!(state.contains("public-subnet-1"));

    let output = tierflow(temp.path())
        .args(["destroy", "--yes", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let state = fs::read_to_string(temp.path().join(".tierflow").join("state.json")).unwrap();
    let state: serde_json::Value = serde_json::from_str(&state).unwrap();
    assert!(state["resources"].as_object().unwrap().is_empty());
}
