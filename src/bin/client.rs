//! CFP 클라이언트 - Chunk Fetch Protocol
//!
//! 파일 목록을 읽어 한 번에 하나씩 서버에서 다운로드한다.
//! 파일 하나가 실패해도 다음 파일로 계속 진행한다.
//!
//! 사용법:
//!   cargo run --release --bin cfp-client -- <HOST> <PORT> <FILE_LIST> [OPTIONS]
//!
//! 예시:
//!   # 기본 다운로드
//!   cargo run --release --bin cfp-client -- localhost 51234 files.txt
//!
//!   # 불안정한 네트워크 + 출력 디렉토리 지정
//!   cargo run --release --bin cfp-client -- 10.0.0.5 51234 files.txt --profile unstable -o downloads

use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cfp::client::read_file_list;
use cfp::{Client, Config};

const USAGE: &str = r#"CFP Client - Chunk Fetch Protocol 클라이언트

파일 목록의 파일을 순서대로 다운로드
- 한 번에 한 청크씩 요청/응답
- 응답이 없으면 타임아웃을 두 배로 늘려 재전송

사용법:
  cargo run --release --bin cfp-client -- <HOST> <PORT> <FILE_LIST> [OPTIONS]

옵션:
  -o, --output-dir <DIR>   저장 디렉토리 (기본: .)
  --profile <NAME>         설정 프리셋: default, lan, unstable
  --chunk-size <BYTES>     청크 크기 (기본: 1000)
  --timeout-ms <MS>        초기 타임아웃 (기본: 1000)
  --retries <N>            최대 시도 횟수 (기본: 5)
  -h, --help               이 도움말 출력

로그 레벨은 RUST_LOG 환경 변수로 조정 (예: RUST_LOG=cfp=debug)
"#;

/// 클라이언트 설정
#[derive(Debug)]
struct ClientConfig {
    host: String,
    port: u16,
    file_list: PathBuf,
    output_dir: PathBuf,
    config: Config,
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{flag} 값이 필요함"))?;
    value
        .parse()
        .map_err(|_| format!("{flag}: 유효하지 않은 값 '{value}'"))
}

fn profile(name: &str) -> Result<Config, String> {
    match name {
        "default" => Ok(Config::default()),
        "lan" => Ok(Config::lan()),
        "unstable" => Ok(Config::unstable_network()),
        other => Err(format!("알 수 없는 프로필: {other}")),
    }
}

/// 인자 파싱
///
/// 프로필을 먼저 적용하고 개별 옵션으로 덮어쓴다.
/// `--help` 는 `Ok(None)` 으로 돌려준다.
fn parse_args(args: &[String]) -> Result<Option<ClientConfig>, String> {
    let mut positionals = Vec::new();
    let mut output_dir = PathBuf::from(".");
    let mut base = Config::default();
    let mut chunk_size = None;
    let mut timeout_ms = None;
    let mut retries = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--output-dir" | "-o" => {
                output_dir = parse_value(&args[i], args.get(i + 1))?;
                i += 1;
            }
            "--profile" => {
                let name: String = parse_value(&args[i], args.get(i + 1))?;
                base = profile(&name)?;
                i += 1;
            }
            "--chunk-size" => {
                chunk_size = Some(parse_value(&args[i], args.get(i + 1))?);
                i += 1;
            }
            "--timeout-ms" => {
                timeout_ms = Some(parse_value(&args[i], args.get(i + 1))?);
                i += 1;
            }
            "--retries" => {
                retries = Some(parse_value(&args[i], args.get(i + 1))?);
                i += 1;
            }
            "--help" | "-h" => return Ok(None),
            flag if flag.starts_with('-') => return Err(format!("알 수 없는 옵션: {flag}")),
            positional => positionals.push(positional.to_string()),
        }
        i += 1;
    }

    let [host, port, file_list]: [String; 3] = positionals
        .try_into()
        .map_err(|_| "<HOST> <PORT> <FILE_LIST> 인자가 필요함".to_string())?;
    let port = port
        .parse()
        .map_err(|_| format!("포트는 숫자여야 함: {port}"))?;

    let mut config = base;
    if let Some(chunk_size) = chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(timeout_ms) = timeout_ms {
        config.initial_timeout_ms = timeout_ms;
    }
    if let Some(retries) = retries {
        config.max_retries = retries;
    }

    Ok(Some(ClientConfig {
        host,
        port,
        file_list: PathBuf::from(file_list),
        output_dir,
        config,
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = std::env::args().collect();
    let client_config = match parse_args(&args) {
        Ok(Some(config)) => config,
        Ok(None) => {
            println!("{USAGE}");
            return Ok(());
        }
        Err(e) => {
            eprintln!("에러: {e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    info!("CFP Client starting...");

    let files = read_file_list(&client_config.file_list).await?;
    info!("{} files to download from {:?}", files.len(), client_config.file_list);

    let server_addr = tokio::net::lookup_host((client_config.host.as_str(), client_config.port))
        .await?
        .next()
        .ok_or_else(|| format!("주소를 찾을 수 없음: {}", client_config.host))?;
    info!("Server address: {}", server_addr);
    info!(
        "Chunk size: {} bytes, initial timeout: {} ms, max retries: {}",
        client_config.config.chunk_size,
        client_config.config.initial_timeout_ms,
        client_config.config.max_retries
    );

    let client = Client::connect(server_addr, client_config.config, client_config.output_dir).await?;
    let results = client.download_all(files).await;

    let failed: Vec<&str> = results
        .iter()
        .filter(|(_, result)| result.is_err())
        .map(|(name, _)| name.as_str())
        .collect();

    info!("Batch complete: {}/{} succeeded", results.len() - failed.len(), results.len());
    if !failed.is_empty() {
        warn!("실패한 파일: {}", failed.join(", "));
        std::process::exit(1);
    }

    Ok(())
}
