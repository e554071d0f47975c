//! 에러 코드 상수 정의
//!
//! 프론트엔드에서 i18n 처리를 위해 에러 코드를 문자열로 반환합니다.

use std::io;

/// 대상 디렉토리가 없고 생성이 허용되지 않음
pub const DIRECTORY_NOT_EXISTS: &str = "DIRECTORY_NOT_EXISTS";

/// 경로 접근 검사 시간 초과
pub const TIMEOUT: &str = "TIMEOUT";

/// 대상 파일을 다른 프로세스가 사용 중
pub const FILE_IN_USE: &str = "FILE_IN_USE";

/// 원본 파일을 읽을 수 없음
pub const SOURCE_UNREADABLE: &str = "SOURCE_UNREADABLE";

/// 파일 복사 실패
pub const COPY_FAILED: &str = "COPY_FAILED";

/// 원본 디렉토리 목록 조회 실패
pub const SOURCE_LIST_FAILED: &str = "SOURCE_LIST_FAILED";

/// 대상 디렉토리 생성 실패
pub const CREATE_DIR_FAILED: &str = "CREATE_DIR_FAILED";

/// 대상 경로에 접근할 수 없음
pub const TARGET_NOT_ACCESSIBLE: &str = "TARGET_NOT_ACCESSIBLE";

/// 복사 후 검증 실패
pub const VERIFY_FAILED: &str = "VERIFY_FAILED";

/// Codes treated as transient: network shares dropping out, busy handles.
pub const NETWORK_ERROR_CODES: &[&str] = &[
    "ENOENT",
    "EACCES",
    "EPERM",
    "ETIMEDOUT",
    "ECONNREFUSED",
    "ENETUNREACH",
    "EHOSTUNREACH",
    "EBUSY",
    "EAGAIN",
];

pub fn is_network_error_code(code: &str) -> bool {
    NETWORK_ERROR_CODES.contains(&code)
}

/// Maps an I/O error to a POSIX-style code string.
pub fn io_error_code(err: &io::Error) -> Option<&'static str> {
    #[cfg(unix)]
    if err.raw_os_error() == Some(1) {
        return Some("EPERM");
    }

    let code = match err.kind() {
        io::ErrorKind::NotFound => "ENOENT",
        io::ErrorKind::PermissionDenied => "EACCES",
        io::ErrorKind::TimedOut => "ETIMEDOUT",
        io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
        io::ErrorKind::NetworkUnreachable => "ENETUNREACH",
        io::ErrorKind::HostUnreachable => "EHOSTUNREACH",
        io::ErrorKind::ResourceBusy => "EBUSY",
        io::ErrorKind::WouldBlock => "EAGAIN",
        io::ErrorKind::AlreadyExists => "EEXIST",
        io::ErrorKind::NotADirectory => "ENOTDIR",
        io::ErrorKind::IsADirectory => "EISDIR",
        io::ErrorKind::StorageFull => "ENOSPC",
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_codes() {
        assert!(is_network_error_code("ETIMEDOUT"));
        assert!(is_network_error_code("ENOENT"));
        assert!(!is_network_error_code(FILE_IN_USE));
        assert!(!is_network_error_code(DIRECTORY_NOT_EXISTS));
    }

    #[test]
    fn test_io_error_code_mapping() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(io_error_code(&err), Some("ENOENT"));

        let err = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(io_error_code(&err), Some("ETIMEDOUT"));

        let err = io::Error::new(io::ErrorKind::InvalidData, "bad");
        assert_eq!(io_error_code(&err), None);
    }
}
