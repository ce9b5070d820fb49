use futures::StreamExt;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec};

/// 마지막으로 읽은 비어 있지 않은 라인을 보관한다.
pub(super) type LastLine = Arc<Mutex<Option<String>>>;

/// 드라이버 프로세스 파이프를 읽어 tracing 로그로 중계한다.
///
/// `last_line`이 주어지면 마지막 라인을 갱신해 실패 사유로 쓸 수 있게 한다.
pub(super) async fn pipe_forwarder<R>(reader: R, tag: &'static str, last_line: Option<LastLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new());
    while let Some(line_result) = lines.next().await {
        match line_result {
            Ok(line) => {
                tracing::debug!(target: "driver", "{tag}: {line}");
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if let Some(slot) = &last_line {
                    if let Ok(mut guard) = slot.lock() {
                        *guard = Some(trimmed.to_string());
                    }
                }
            }
            Err(err) => {
                tracing::warn!(target: "driver", "{tag} 읽기 오류: {err}");
                break;
            }
        }
    }
}
