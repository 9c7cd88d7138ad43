//! 单实例进程锁
//!
//! 以独占方式创建 PID 文件，守卫释放时删除

use crate::error::LockError;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// PID 文件锁守卫
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    pid: u32,
}

impl PidLock {
    /// 获取锁
    ///
    /// 文件已存在且其中的进程仍然存活时返回 `AlreadyRunning`；
    /// 进程已退出的残留文件会被删除并重试一次。
    ///
    /// # 参数
    /// * `path` - PID 文件路径
    ///
    /// # 返回
    /// * `Result<Self, LockError>` - 锁守卫
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();

        match Self::create(&path) {
            Ok(lock) => return Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(Self::io_error(&path, e)),
        }

        if let Some(pid) = read_pid(&path) {
            if process_alive(pid) {
                return Err(LockError::AlreadyRunning {
                    pid,
                    path: path.display().to_string(),
                });
            }
        }

        tracing::warn!(path = %path.display(), "发现残留的 PID 文件，删除后重试");
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != ErrorKind::NotFound {
                return Err(Self::io_error(&path, e));
            }
        }

        match Self::create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(LockError::AlreadyRunning {
                pid: read_pid(&path).unwrap_or_default(),
                path: path.display().to_string(),
            }),
            Err(e) => Err(Self::io_error(&path, e)),
        }
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let pid = std::process::id();
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{pid}")?;
        file.sync_all()?;

        tracing::info!(path = %path.display(), pid = pid, "已获取 PID 锁");
        Ok(Self {
            path: path.to_path_buf(),
            pid,
        })
    }

    fn io_error(path: &Path, source: std::io::Error) -> LockError {
        LockError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// PID 文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 写入的进程号
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "已释放 PID 锁"),
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "删除 PID 文件失败"),
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // 信号 0 只做存在性与权限检查
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
