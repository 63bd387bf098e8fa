//! 错误类型定义
//!
//! 提供日志事务层操作的错误类型。

use core::fmt;

/// 事务层操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// 日志未激活（挂载为只读）
    ReadOnly,
    /// 内存分配失败
    NoMemory,
    /// 日志空间不足
    NoSpace,
    /// 挂载已撤回（withdraw），操作中止
    Shutdown,
    /// 不变量被破坏：调用方契约违规或记账错误
    ///
    /// 该错误同时触发挂载级 withdraw。
    FatalInconsistency,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::new(ErrorKind::ReadOnly, "journal is not live");
        assert_eq!(err.kind(), ErrorKind::ReadOnly);
        assert_eq!(format!("{}", err), "ReadOnly: journal is not live");
    }

    #[test]
    fn test_error_equality() {
        let a = Error::new(ErrorKind::NoSpace, "log full");
        let b = Error::new(ErrorKind::NoSpace, "log full");
        assert_eq!(a, b);
    }
}
