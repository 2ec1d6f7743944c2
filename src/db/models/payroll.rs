//! Payroll models: salary structures, employees, payslips and attendance.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::lenient;

pub const ATTENDANCE_STATUSES: &[&str] = &["present", "absent", "leave"];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SalaryStructure {
    pub id: i64,
    pub name: String,
    pub base_salary: f64,
    pub allowances: f64,
    pub deductions: f64,
}

#[derive(Debug, Deserialize)]
pub struct SalaryStructureRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::amount")]
    pub base_salary: Option<f64>,
    #[serde(default, deserialize_with = "lenient::amount")]
    pub allowances: Option<f64>,
    #[serde(default, deserialize_with = "lenient::amount")]
    pub deductions: Option<f64>,
}

/// Gross and net pay for one period
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PayAmounts {
    pub gross: f64,
    pub net: f64,
}

impl PayAmounts {
    /// Gross is base plus allowances, net is gross less deductions. An
    /// employee without a structure is paid nothing.
    pub fn for_structure(structure: Option<&SalaryStructure>) -> Self {
        match structure {
            Some(s) => {
                let gross = s.base_salary + s.allowances;
                Self {
                    gross,
                    net: gross - s.deductions,
                }
            }
            None => Self { gross: 0.0, net: 0.0 },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Employee {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub hire_date: Option<String>,
    pub salary_structure_id: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct EmployeeRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub hire_date: Option<String>,
    pub salary_structure_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payslip {
    pub id: i64,
    pub employee_id: i64,
    pub period_start: String,
    pub period_end: String,
    pub gross: f64,
    pub net: f64,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct PayslipRequest {
    pub employee_id: Option<i64>,
    pub period_start: Option<String>,
    pub period_end: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttendanceRecord {
    pub id: i64,
    pub employee_id: i64,
    pub date: String,
    pub status: String,
    pub hours: f64,
}

#[derive(Debug, Deserialize)]
pub struct AttendanceRequest {
    pub employee_id: Option<i64>,
    pub date: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient::amount")]
    pub hours: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AttendanceQuery {
    pub employee_id: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PayrollSummary {
    pub employees: i64,
    pub payslips: i64,
    pub total_gross: f64,
    pub total_net: f64,
}
