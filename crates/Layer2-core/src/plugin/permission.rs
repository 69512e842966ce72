//! Permission Catalog - 플러그인 권한 정적 테이블
//!
//! 권한 이름 → {카테고리, 위험도, 설명}. 런타임 변경 API는 없다.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// Category / Risk
// ============================================================================

/// 권한 카테고리
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionCategory {
    Read,
    Write,
    Integration,
    System,
    /// 사람의 검토가 필요한 권한 (hook/route 등록, 관리자 접근)
    Dangerous,
}

impl PermissionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Integration => "integration",
            Self::System => "system",
            Self::Dangerous => "dangerous",
        }
    }
}

impl std::fmt::Display for PermissionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 위험도 (Low < Medium < High < Critical)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// 카탈로그 항목
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Permission {
    pub name: &'static str,
    pub category: PermissionCategory,
    pub risk: RiskLevel,
    pub description: &'static str,
}

const fn perm(
    name: &'static str,
    category: PermissionCategory,
    risk: RiskLevel,
    description: &'static str,
) -> Permission {
    Permission {
        name,
        category,
        risk,
        description,
    }
}

use PermissionCategory::{Dangerous, Integration, Read, System, Write};
use RiskLevel::{Critical, High, Low, Medium};

/// 전체 권한 테이블 (선언 순서 유지)
static CATALOG: &[Permission] = &[
    // Read
    perm("invoices:read", Read, Low, "Read invoices and invoice lines"),
    perm("contacts:read", Read, Low, "Read customers and suppliers"),
    perm("payments:read", Read, Low, "Read recorded payments"),
    perm("journal:read", Read, Low, "Read journal entries"),
    perm("accounts:read", Read, Low, "Read the chart of accounts"),
    perm("reports:read", Read, Low, "Run financial reports"),
    perm("banking:read", Read, Medium, "Read bank accounts and transactions"),
    perm("payroll:read", Read, Medium, "Read payroll runs and payslips"),
    perm("settings:read", Read, Low, "Read tenant settings"),
    // Write
    perm("invoices:write", Write, Medium, "Create and modify invoices"),
    perm("contacts:write", Write, Medium, "Create and modify contacts"),
    perm("payments:write", Write, High, "Record and refund payments"),
    perm("journal:write", Write, High, "Create and post journal entries"),
    perm("banking:write", Write, High, "Import and reconcile bank transactions"),
    perm("payroll:write", Write, High, "Create and approve payroll runs"),
    perm("settings:write", Write, Medium, "Modify tenant settings"),
    // Integration
    perm("email:send", Integration, Medium, "Send email on behalf of the tenant"),
    perm("network:external", Integration, High, "Call external network services"),
    perm("webhooks:send", Integration, Medium, "Deliver outgoing webhooks"),
    // System
    perm("storage:files", System, Medium, "Store and read files"),
    perm("scheduler:register", System, Medium, "Register scheduled jobs"),
    perm("database:migrate", System, High, "Run database migrations"),
    // Dangerous
    perm("hooks:register", Dangerous, High, "Subscribe to domain events"),
    perm("routes:register", Dangerous, High, "Expose HTTP routes"),
    perm("admin:access", Dangerous, Critical, "Full administrative access"),
];

lazy_static! {
    static ref BY_NAME: HashMap<&'static str, &'static Permission> =
        CATALOG.iter().map(|p| (p.name, p)).collect();
}

/// 이름으로 권한 조회
pub fn get_permission(name: &str) -> Option<&'static Permission> {
    BY_NAME.get(name).copied()
}

/// 전체 카탈로그
pub fn all_permissions() -> &'static [Permission] {
    CATALOG
}

/// 카탈로그에 존재하는지 확인
pub fn validate_permission(name: &str) -> bool {
    BY_NAME.contains_key(name)
}

/// 알 수 없는 권한 이름 목록 (입력 순서)
pub fn validate_permissions<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    names
        .iter()
        .map(AsRef::as_ref)
        .filter(|n| !validate_permission(n))
        .map(str::to_string)
        .collect()
}

pub fn permissions_by_category(category: PermissionCategory) -> Vec<&'static Permission> {
    CATALOG.iter().filter(|p| p.category == category).collect()
}

pub fn permissions_by_risk(risk: RiskLevel) -> Vec<&'static Permission> {
    CATALOG.iter().filter(|p| p.risk == risk).collect()
}

/// 최고 위험도 (비어 있거나 모두 무효이면 `Low`)
pub fn highest_risk_level<S: AsRef<str>>(names: &[S]) -> RiskLevel {
    names
        .iter()
        .filter_map(|n| get_permission(n.as_ref()))
        .map(|p| p.risk)
        .max()
        .unwrap_or_default()
}

/// `dangerous` 카테고리 권한 포함 여부
pub fn has_dangerous_permissions<S: AsRef<str>>(names: &[S]) -> bool {
    names
        .iter()
        .filter_map(|n| get_permission(n.as_ref()))
        .any(|p| p.category == PermissionCategory::Dangerous)
}

// ============================================================================
// Summary
// ============================================================================

/// 권한 요약
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionSummary {
    /// 요청된 이름 수 (무효 포함)
    pub total: usize,
    pub by_category: BTreeMap<PermissionCategory, usize>,
    pub by_risk: BTreeMap<RiskLevel, usize>,
    pub highest_risk: RiskLevel,
    pub invalid: Vec<String>,
}

pub fn summarize_permissions<S: AsRef<str>>(names: &[S]) -> PermissionSummary {
    let mut by_category = BTreeMap::new();
    let mut by_risk = BTreeMap::new();
    let mut invalid = Vec::new();

    for name in names.iter().map(AsRef::as_ref) {
        match get_permission(name) {
            Some(p) => {
                *by_category.entry(p.category).or_insert(0) += 1;
                *by_risk.entry(p.risk).or_insert(0) += 1;
            }
            None => invalid.push(name.to_string()),
        }
    }

    PermissionSummary {
        total: names.len(),
        by_category,
        by_risk,
        highest_risk: highest_risk_level(names),
        invalid,
    }
}
