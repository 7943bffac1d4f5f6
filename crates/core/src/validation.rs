//! Input validation utilities.
//!
//! Record fields are checked before anything is staged for write. Each failure names the
//! offending field by its wire name so client tooling can point at it.

use crate::records::{Date, MedicalRecord, PersonalInfo};
use crate::{WorkflowError, WorkflowResult};
use medshare_types::NonEmptyText;

/// Fails if `value` is empty or whitespace only.
pub fn require_non_empty(field: &str, value: &str) -> WorkflowResult<()> {
    NonEmptyText::new(value).map(|_| ()).map_err(|_| {
        WorkflowError::InvalidInput(format!("{field} field must be non-empty value"))
    })
}

fn require_positive(field: &str, value: i32) -> WorkflowResult<()> {
    if value <= 0 {
        return Err(WorkflowError::InvalidInput(format!(
            "{field} field value is not valid"
        )));
    }
    Ok(())
}

/// Validates personal details, reporting the first offending field in wire order.
///
/// # Errors
///
/// Returns `WorkflowError::InvalidInput` if any text field is empty or `age` is not positive.
pub fn validate_personal_info(info: &PersonalInfo) -> WorkflowResult<()> {
    require_non_empty("firstName", &info.first_name)?;
    require_non_empty("lastName", &info.last_name)?;
    require_positive("age", info.age)?;
    require_non_empty("gender", &info.gender)?;
    require_non_empty("email", &info.email)?;
    require_non_empty("contactNumber", &info.contact_number)?;
    require_non_empty("city", &info.city)?;
    require_non_empty("state", &info.state)?;
    require_non_empty("country", &info.country)?;
    require_non_empty("type", &info.role_tag)?;
    Ok(())
}

pub fn validate_date(date: &Date) -> WorkflowResult<()> {
    require_positive("day", date.day)?;
    require_positive("month", date.month)?;
    require_positive("year", date.year)?;
    Ok(())
}

/// Validates a medical record as submitted by a doctor.
///
/// Owner and issuer are stamped by the workflow, so they are not checked here.
pub fn validate_medical_record(record: &MedicalRecord) -> WorkflowResult<()> {
    require_non_empty("type", &record.report_type)?;
    for (field, value) in &record.m_report {
        require_non_empty("mReport key", field)?;
        require_non_empty(field, value)?;
    }
    validate_date(&record.date_of_issue)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_info() -> PersonalInfo {
        PersonalInfo {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            age: 36,
            gender: "female".into(),
            email: "ada@example.org".into(),
            contact_number: "0123456789".into(),
            city: "London".into(),
            state: "Greater London".into(),
            country: "UK".into(),
            role_tag: "patient".into(),
        }
    }

    #[test]
    fn test_complete_personal_info_is_valid() {
        assert!(validate_personal_info(&valid_info()).is_ok());
    }

    #[test]
    fn test_every_empty_text_field_is_rejected_by_name() {
        type Setter = fn(&mut PersonalInfo);
        let cases: [(&str, Setter); 9] = [
            ("firstName", |i| i.first_name.clear()),
            ("lastName", |i| i.last_name.clear()),
            ("gender", |i| i.gender.clear()),
            ("email", |i| i.email = "   ".into()),
            ("contactNumber", |i| i.contact_number.clear()),
            ("city", |i| i.city.clear()),
            ("state", |i| i.state.clear()),
            ("country", |i| i.country.clear()),
            ("type", |i| i.role_tag.clear()),
        ];

        for (field, clear) in cases {
            let mut info = valid_info();
            clear(&mut info);
            let err = validate_personal_info(&info).unwrap_err();
            assert_eq!(
                err.to_string(),
                format!("invalid input: {field} field must be non-empty value")
            );
        }
    }

    #[test]
    fn test_non_positive_age_is_rejected() {
        for age in [0, -1] {
            let info = PersonalInfo {
                age,
                ..valid_info()
            };
            let err = validate_personal_info(&info).unwrap_err();
            assert!(err.to_string().contains("age field value is not valid"));
        }
    }

    #[test]
    fn test_medical_record_validation() {
        let mut record = MedicalRecord {
            report_type: "blood".into(),
            m_report: [("haemoglobin".to_string(), "13.5".to_string())].into(),
            date_of_issue: Date {
                day: 1,
                month: 2,
                year: 2024,
            },
            ..MedicalRecord::default()
        };
        assert!(validate_medical_record(&record).is_ok());

        record.m_report.insert("platelets".into(), String::new());
        assert!(validate_medical_record(&record).is_err());

        record.m_report.remove("platelets");
        record.date_of_issue.month = 0;
        let err = validate_medical_record(&record).unwrap_err();
        assert!(err.to_string().contains("month"));
    }
}
