//! 外部程序适配器.
//!
//! 每个适配器只负责拼接命令行, 调用外部程序并读回其产物.

use std::process::Command;
use tracing::debug;

mod dcm2niix;
mod dcmqi;
mod nnunet;

pub use dcm2niix::Dcm2NiixIngest;
pub use dcmqi::DcmqiEncoder;
pub use nnunet::NnUnetCommand;

/// 运行外部程序并等待其退出.
///
/// 无法启动或退出码非零时, 返回可读的失败原因 (含 stderr 的最后一行).
fn run_program(cmd: &mut Command) -> Result<(), String> {
    debug!(command = ?cmd, "spawning external program");
    let program = cmd.get_program().to_string_lossy().into_owned();
    let output = cmd
        .output()
        .map_err(|e| format!("cannot spawn `{program}`: {e}"))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let last = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no diagnostics");
    Err(format!("`{program}` exited with {}: {last}", output.status))
}
