//! CFP 서버 - Chunk Fetch Protocol
//!
//! 컨트롤 포트에서 다운로드 요청을 받고
//! 다운로드마다 전용 데이터 포트의 워커를 띄운다.
//!
//! 사용법:
//!   cargo run --release --bin cfp-server -- <PORT> [OPTIONS]
//!
//! 예시:
//!   # 현재 디렉토리의 파일 제공
//!   cargo run --release --bin cfp-server -- 51234
//!
//!   # 특정 디렉토리, 데이터 포트 범위 지정
//!   cargo run --release --bin cfp-server -- 51234 --root ./files --port-range 52000-52100

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cfp::{Config, Server};

const USAGE: &str = r#"CFP Server - Chunk Fetch Protocol 서버

UDP 요청/응답형 파일 다운로드 서버
- 컨트롤 포트에서 DOWNLOAD 요청 수신
- 다운로드마다 전용 데이터 포트 할당

사용법:
  cargo run --release --bin cfp-server -- <PORT> [OPTIONS]

옵션:
  -b, --bind <IP>             바인드 IP (기본: 0.0.0.0)
                              인터페이스가 여럿이면 클라이언트가 접속할 IP 지정
  -r, --root <DIR>            제공할 파일 디렉토리 (기본: .)
  --port-range <START-END>    데이터 포트 범위 (기본: 50000-51000)
  --max-sessions <N>          최대 동시 세션 수 (기본: 64)
  --idle-timeout <SECS>       워커 유휴 타임아웃, 0이면 비활성화 (기본: 30)
  -h, --help                  이 도움말 출력

로그 레벨은 RUST_LOG 환경 변수로 조정 (예: RUST_LOG=cfp=debug)
"#;

/// 서버 설정
#[derive(Debug)]
struct ServerConfig {
    bind_ip: IpAddr,
    port: u16,
    root: PathBuf,
    config: Config,
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{flag} 값이 필요함"))?;
    value
        .parse()
        .map_err(|_| format!("{flag}: 유효하지 않은 값 '{value}'"))
}

fn parse_port_range(value: &str) -> Result<(u16, u16), String> {
    let (start, end) = value
        .split_once('-')
        .ok_or_else(|| format!("--port-range: START-END 형식 필요 '{value}'"))?;
    let start = start
        .parse()
        .map_err(|_| format!("--port-range: 유효하지 않은 시작 포트 '{start}'"))?;
    let end = end
        .parse()
        .map_err(|_| format!("--port-range: 유효하지 않은 끝 포트 '{end}'"))?;
    Ok((start, end))
}

/// 인자 파싱
///
/// `--help` 는 `Ok(None)` 으로 돌려준다.
fn parse_args(args: &[String]) -> Result<Option<ServerConfig>, String> {
    let mut port = None;
    let mut config = ServerConfig {
        bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        port: 0,
        root: PathBuf::from("."),
        config: Config::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                config.bind_ip = parse_value(&args[i], args.get(i + 1))?;
                i += 1;
            }
            "--root" | "-r" => {
                config.root = parse_value(&args[i], args.get(i + 1))?;
                i += 1;
            }
            "--port-range" => {
                let value: String = parse_value(&args[i], args.get(i + 1))?;
                let (start, end) = parse_port_range(&value)?;
                config.config.data_port_start = start;
                config.config.data_port_end = end;
                i += 1;
            }
            "--max-sessions" => {
                config.config.max_sessions = parse_value(&args[i], args.get(i + 1))?;
                i += 1;
            }
            "--idle-timeout" => {
                config.config.worker_idle_timeout_secs = parse_value(&args[i], args.get(i + 1))?;
                i += 1;
            }
            "--help" | "-h" => return Ok(None),
            flag if flag.starts_with('-') => return Err(format!("알 수 없는 옵션: {flag}")),
            positional => {
                if port.is_some() {
                    return Err(format!("예상하지 못한 인자: {positional}"));
                }
                port = Some(
                    positional
                        .parse()
                        .map_err(|_| format!("포트는 숫자여야 함: {positional}"))?,
                );
            }
        }
        i += 1;
    }

    config.port = port.ok_or("컨트롤 포트가 필요함")?;
    Ok(Some(config))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = std::env::args().collect();
    let server_config = match parse_args(&args) {
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

    info!("CFP Server starting...");
    info!("Idle timeout: {:?}", server_config.config.worker_idle_timeout());

    let addr = SocketAddr::new(server_config.bind_ip, server_config.port);
    let server = Server::bind(addr, server_config.root, server_config.config).await?;
    server.run().await?;

    Ok(())
}
