//! Payroll: salary structures, employees, payslips and attendance.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use super::Module;
use crate::api::auth::{AuthUser, READ_ROLES, WRITE_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiPath, ApiQuery, ValidationErrorBuilder};
use crate::api::pricing::require_feature;
use crate::api::validation::{non_empty, validate_email, validate_one_of};
use crate::db::{
    fetch_filtered, AttendanceQuery, AttendanceRecord, AttendanceRequest, DbPool, Employee,
    EmployeeRequest, Filters, PayAmounts, PayrollSummary, Payslip, PayslipRequest,
    SalaryStructure, SalaryStructureRequest, ATTENDANCE_STATUSES,
};
use crate::utils::{parse_datetime, round2};
use crate::AppState;

pub struct Payroll;

impl Module for Payroll {
    fn name(&self) -> &'static str {
        "nexora-payroll"
    }

    fn description(&self) -> &'static str {
        "Employees, salary structures, payslips and attendance"
    }

    fn icon(&self) -> &'static str {
        "💵"
    }

    fn endpoints(&self) -> &'static [&'static str] {
        &[
            "/api/items",
            "/api/payroll/salary-structures",
            "/api/payroll/employees",
            "/api/payroll/payslip",
            "/api/payroll/attendance",
            "/api/payroll/summary",
        ]
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route(
                "/api/payroll/salary-structures",
                get(list_structures).post(create_structure),
            )
            .route("/api/payroll/employees", get(list_employees).post(create_employee))
            .route("/api/payroll/employees/:id", get(get_employee))
            .route("/api/payroll/employees/:id/payslips", get(list_payslips))
            .route("/api/payroll/payslip", post(create_payslip))
            .route("/api/payroll/attendance", get(list_attendance).post(record_attendance))
            .route("/api/payroll/summary", get(summary))
    }
}

/// Normalize a calendar date to `YYYY-MM-DD`
fn calendar_date(raw: &str) -> Option<String> {
    parse_datetime(raw).map(|dt| dt.format("%Y-%m-%d").to_string())
}

async fn find_employee(db: &DbPool, id: i64) -> Result<Employee, ApiError> {
    sqlx::query_as("SELECT * FROM payroll_employees WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee not found"))
}

async fn list_structures(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<SalaryStructure>>, ApiError> {
    user.require(WRITE_ROLES)?;
    let structures = sqlx::query_as("SELECT * FROM payroll_salary_structures ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(structures))
}

async fn create_structure(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<SalaryStructureRequest>,
) -> Result<(StatusCode, Json<SalaryStructure>), ApiError> {
    user.require(WRITE_ROLES)?;
    let name = non_empty(&request.name).ok_or_else(|| ApiError::bad_request("name required"))?;

    let mut errors = ValidationErrorBuilder::new();
    for (field, value) in [
        ("base_salary", request.base_salary),
        ("allowances", request.allowances),
        ("deductions", request.deductions),
    ] {
        if matches!(value, Some(v) if v < 0.0) {
            errors.add(field, format!("{} cannot be negative", field));
        }
    }
    errors.finish()?;

    let structure: SalaryStructure = sqlx::query_as(
        r#"INSERT INTO payroll_salary_structures (name, base_salary, allowances, deductions)
           VALUES (?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(name)
    .bind(request.base_salary.unwrap_or(0.0))
    .bind(request.allowances.unwrap_or(0.0))
    .bind(request.deductions.unwrap_or(0.0))
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(structure)))
}

async fn list_employees(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<Employee>>, ApiError> {
    user.require(READ_ROLES)?;
    let employees = sqlx::query_as("SELECT * FROM payroll_employees ORDER BY last_name, first_name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(employees))
}

async fn get_employee(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Employee>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find_employee(&state.db, id).await?))
}

async fn create_employee(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<EmployeeRequest>,
) -> Result<(StatusCode, Json<Employee>), ApiError> {
    user.require(WRITE_ROLES)?;
    let (Some(first_name), Some(last_name), Some(email)) = (
        non_empty(&request.first_name),
        non_empty(&request.last_name),
        non_empty(&request.email),
    ) else {
        return Err(ApiError::bad_request("first_name, last_name and email required"));
    };

    let mut errors = ValidationErrorBuilder::new();
    errors.check("email", validate_email(email));
    let hire_date = match non_empty(&request.hire_date) {
        Some(raw) => {
            let date = calendar_date(raw);
            if date.is_none() {
                errors.add("hire_date", "hire_date must be a date");
            }
            date
        }
        None => None,
    };
    errors.finish()?;

    let employee: Employee = sqlx::query_as(
        r#"INSERT INTO payroll_employees (first_name, last_name, email, hire_date, salary_structure_id)
           VALUES (?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(first_name)
    .bind(last_name)
    .bind(email)
    .bind(hire_date)
    .bind(request.salary_structure_id)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(employee_id = employee.id, "Added employee");
    Ok((StatusCode::CREATED, Json(employee)))
}

async fn list_payslips(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Vec<Payslip>>, ApiError> {
    user.require(WRITE_ROLES)?;
    find_employee(&state.db, id).await?;
    let payslips = sqlx::query_as(
        "SELECT * FROM payroll_payslips WHERE employee_id = ? ORDER BY period_start DESC, id DESC",
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(payslips))
}

async fn create_payslip(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<PayslipRequest>,
) -> Result<(StatusCode, Json<Payslip>), ApiError> {
    user.require(WRITE_ROLES)?;
    let (Some(employee_id), Some(start), Some(end)) = (
        request.employee_id,
        non_empty(&request.period_start),
        non_empty(&request.period_end),
    ) else {
        return Err(ApiError::bad_request(
            "employee_id, period_start and period_end required",
        ));
    };

    let (Some(period_start), Some(period_end)) = (calendar_date(start), calendar_date(end)) else {
        return Err(ApiError::validation_field("period", "period dates must be dates"));
    };
    if period_end < period_start {
        return Err(ApiError::validation_field(
            "period_end",
            "period_end cannot be before period_start",
        ));
    }

    let employee = find_employee(&state.db, employee_id).await?;
    let structure: Option<SalaryStructure> = match employee.salary_structure_id {
        Some(id) => sqlx::query_as("SELECT * FROM payroll_salary_structures WHERE id = ?")
            .bind(id)
            .fetch_optional(&state.db)
            .await?,
        None => None,
    };
    let pay = PayAmounts::for_structure(structure.as_ref());

    let payslip: Payslip = sqlx::query_as(
        r#"INSERT INTO payroll_payslips (employee_id, period_start, period_end, gross, net)
           VALUES (?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(employee_id)
    .bind(&period_start)
    .bind(&period_end)
    .bind(round2(pay.gross))
    .bind(round2(pay.net))
    .fetch_one(&state.db)
    .await?;

    tracing::info!(employee_id, payslip_id = payslip.id, net = payslip.net, "Issued payslip");
    Ok((StatusCode::CREATED, Json(payslip)))
}

async fn list_attendance(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<AttendanceQuery>,
) -> Result<Json<Vec<AttendanceRecord>>, ApiError> {
    user.require(READ_ROLES)?;
    let mut filters = Filters::new();
    filters
        .eq("employee_id", query.employee_id)
        .eq("status", query.status);
    let records = fetch_filtered(
        &state.db,
        "*",
        "payroll_attendance",
        &filters,
        "date DESC, id DESC",
    )
    .await?;
    Ok(Json(records))
}

async fn record_attendance(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<AttendanceRequest>,
) -> Result<(StatusCode, Json<AttendanceRecord>), ApiError> {
    user.require(WRITE_ROLES)?;
    let (Some(employee_id), Some(raw_date)) = (request.employee_id, non_empty(&request.date)) else {
        return Err(ApiError::bad_request("employee_id and date required"));
    };
    let status = non_empty(&request.status).unwrap_or("present");
    let hours = request.hours.unwrap_or(0.0);

    let mut errors = ValidationErrorBuilder::new();
    errors.check("status", validate_one_of(status, ATTENDANCE_STATUSES, "status"));
    if !(0.0..=24.0).contains(&hours) {
        errors.add("hours", "hours must be between 0 and 24");
    }
    let date = calendar_date(raw_date);
    if date.is_none() {
        errors.add("date", "date must be a date");
    }
    errors.finish()?;

    find_employee(&state.db, employee_id).await?;
    let record: AttendanceRecord = sqlx::query_as(
        r#"INSERT INTO payroll_attendance (employee_id, date, status, hours)
           VALUES (?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(employee_id)
    .bind(date)
    .bind(status)
    .bind(hours)
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Headcount and payslip totals, a premium report after the free period
async fn summary(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<PayrollSummary>, ApiError> {
    user.require(WRITE_ROLES)?;
    require_feature(&state, &user, "advanced_payroll")?;

    let employees: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payroll_employees")
        .fetch_one(&state.db)
        .await?;
    let (payslips, total_gross, total_net): (i64, f64, f64) = sqlx::query_as(
        r#"SELECT COUNT(*),
                  CAST(COALESCE(SUM(gross), 0) AS REAL),
                  CAST(COALESCE(SUM(net), 0) AS REAL)
           FROM payroll_payslips"#,
    )
    .fetch_one(&state.db)
    .await?;

    Ok(Json(PayrollSummary {
        employees,
        payslips,
        total_gross: round2(total_gross),
        total_net: round2(total_net),
    }))
}
