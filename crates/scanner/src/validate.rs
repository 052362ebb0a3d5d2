//! 제출 입력 검증
//!
//! 대상과 템플릿 선택자는 외부 스캐너의 명령행 인자로 그대로 전달되므로
//! 인자 주입을 막기 위해 형식을 제한합니다.
//! - 대상: 1-2048 바이트, 제어 문자 없음, `-`로 시작하지 않음
//! - 선택자: 비어 있지 않음, 공백/쉼표 없음, `-`로 시작하지 않음
//! - 옵션: 상한 초과 금지 (`0`은 엔진 기본값)

use vigil_core::error::ValidationError;
use vigil_core::types::ScanOptions;

/// 대상 최대 길이 (바이트)
pub const MAX_TARGET_LEN: usize = 2048;
/// 선택자 최대 길이 (바이트)
pub const MAX_SELECTOR_LEN: usize = 256;
/// 작업 하나의 선택자 최대 개수
pub const MAX_SELECTORS: usize = 512;

pub const MAX_CONCURRENCY: u32 = 1000;
pub const MAX_RATE_LIMIT: u32 = 100_000;
pub const MAX_TIMEOUT_SECS: u32 = 3600;
pub const MAX_RETRIES: u32 = 10;

/// 스캔 대상을 검증합니다.
pub fn validate_target(target: &str) -> Result<(), ValidationError> {
    if target.trim().is_empty() {
        return Err(ValidationError::Empty {
            field: "target".to_owned(),
        });
    }
    if target.len() > MAX_TARGET_LEN {
        return Err(ValidationError::OutOfRange {
            field: "target".to_owned(),
            value: target.len() as u64,
            max: MAX_TARGET_LEN as u64,
        });
    }
    if target.chars().any(char::is_control) {
        return Err(invalid("target", "must not contain control characters"));
    }
    if target.starts_with('-') {
        return Err(invalid("target", "must not start with '-'"));
    }
    Ok(())
}

/// 템플릿 ID 또는 태그 목록을 검증합니다.
pub fn validate_selectors(field: &str, selectors: &[String]) -> Result<(), ValidationError> {
    if selectors.len() > MAX_SELECTORS {
        return Err(ValidationError::OutOfRange {
            field: field.to_owned(),
            value: selectors.len() as u64,
            max: MAX_SELECTORS as u64,
        });
    }
    for selector in selectors {
        if selector.is_empty() {
            return Err(ValidationError::Empty {
                field: field.to_owned(),
            });
        }
        if selector.len() > MAX_SELECTOR_LEN {
            return Err(ValidationError::OutOfRange {
                field: field.to_owned(),
                value: selector.len() as u64,
                max: MAX_SELECTOR_LEN as u64,
            });
        }
        if selector
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == ',')
        {
            return Err(ValidationError::Invalid {
                field: field.to_owned(),
                reason: format!("'{selector}' must not contain whitespace or commas"),
            });
        }
        if selector.starts_with('-') {
            return Err(ValidationError::Invalid {
                field: field.to_owned(),
                reason: format!("'{selector}' must not start with '-'"),
            });
        }
    }
    Ok(())
}

/// 옵션 상한을 검증합니다.
pub fn validate_options(options: &ScanOptions) -> Result<(), ValidationError> {
    let limits = [
        ("options.concurrency", options.concurrency, MAX_CONCURRENCY),
        ("options.rate_limit", options.rate_limit, MAX_RATE_LIMIT),
        ("options.timeout", options.timeout_secs, MAX_TIMEOUT_SECS),
        ("options.retries", options.retries, MAX_RETRIES),
    ];
    for (field, value, max) in limits {
        if value > max {
            return Err(ValidationError::OutOfRange {
                field: field.to_owned(),
                value: u64::from(value),
                max: u64::from(max),
            });
        }
    }
    Ok(())
}

fn invalid(field: &str, reason: &str) -> ValidationError {
    ValidationError::Invalid {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_rules() {
        assert!(validate_target("http://example.com").is_ok());
        assert!(validate_target("10.0.0.1:8443").is_ok());
        assert!(matches!(
            validate_target("   "),
            Err(ValidationError::Empty { .. })
        ));
        assert!(validate_target("-u http://x").is_err());
        assert!(validate_target("http://x\nhttp://y").is_err());
        assert!(matches!(
            validate_target(&"a".repeat(MAX_TARGET_LEN + 1)),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn selector_rules() {
        let ok = vec!["cve-2021-44228".to_owned(), "tech/nginx".to_owned()];
        assert!(validate_selectors("template_ids", &ok).is_ok());
        assert!(validate_selectors("tags", &[]).is_ok());

        let comma = vec!["a,b".to_owned()];
        assert!(validate_selectors("tags", &comma).is_err());

        let flag = vec!["-debug".to_owned()];
        assert!(validate_selectors("tags", &flag).is_err());

        let empty = vec![String::new()];
        assert!(matches!(
            validate_selectors("tags", &empty),
            Err(ValidationError::Empty { .. })
        ));
    }

    #[test]
    fn option_limits() {
        assert!(validate_options(&ScanOptions::default()).is_ok());

        let options = ScanOptions {
            retries: MAX_RETRIES + 1,
            ..ScanOptions::default()
        };
        let err = validate_options(&options).unwrap_err();
        assert_eq!(
            err,
            ValidationError::OutOfRange {
                field: "options.retries".to_owned(),
                value: 11,
                max: 10,
            }
        );
    }
}
