//! Message body generation for every (message type, channel) pair.
//!
//! Two families of entry points:
//!
//! - Type-specific: [`generate_reminder_email_content`] /
//!   [`generate_reminder_sms_content`] take an explicit lead time.
//! - Generic: [`generate_content`] / [`generate_sms_content`] infer the
//!   message type from the context — a set `lead_hours` means reminder,
//!   absence means booking confirmation.

use chrono::{NaiveDate, NaiveTime};
use lembra_core::config::ClinicConfig;

use crate::{
    error::{Result, TemplateDataError},
    summary::AppointmentSummary,
};

/// Hard ceiling on SMS body length, in characters.
pub const SMS_MAX_CHARS: usize = 160;

/// Everything the templates need to render one message.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub patient_name: String,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    /// Hours until the appointment for reminder messages; `None` means this
    /// is a booking confirmation.
    pub lead_hours: Option<u32>,
}

impl TemplateContext {
    fn validate(&self) -> Result<&str> {
        let name = self.patient_name.trim();
        if name.is_empty() {
            return Err(TemplateDataError::MissingField {
                field: "patient_name",
            });
        }
        Ok(name)
    }

    fn summary(&self) -> AppointmentSummary {
        AppointmentSummary::new(self.appointment_date, self.appointment_time)
    }
}

/// Subject line matching the body [`generate_content`] produces.
pub fn generate_email_subject(clinic: &ClinicConfig, ctx: &TemplateContext) -> String {
    match ctx.lead_hours {
        Some(hours) => format!("Lembrete: Consulta em {} - {}", lead_phrase(hours), clinic.name),
        None => format!("Confirmação de Consulta - {}", clinic.name),
    }
}

/// Render the email body for `ctx`, inferring confirmation vs reminder.
pub fn generate_content(clinic: &ClinicConfig, ctx: &TemplateContext) -> Result<String> {
    match ctx.lead_hours {
        Some(hours) => generate_reminder_email_content(clinic, ctx, hours),
        None => generate_confirmation_email_content(clinic, ctx),
    }
}

/// Render the SMS body for `ctx`, inferring confirmation vs reminder.
pub fn generate_sms_content(clinic: &ClinicConfig, ctx: &TemplateContext) -> Result<String> {
    match ctx.lead_hours {
        Some(hours) => generate_reminder_sms_content(clinic, ctx, hours),
        None => generate_confirmation_sms_content(clinic, ctx),
    }
}

/// HTML email reminding the patient their visit is `lead_hours` away.
pub fn generate_reminder_email_content(
    clinic: &ClinicConfig,
    ctx: &TemplateContext,
    lead_hours: u32,
) -> Result<String> {
    let name = ctx.validate()?;
    let summary = ctx.summary();
    let phrase = lead_phrase(lead_hours);

    Ok(format!(
        r#"<!DOCTYPE html>
<html lang="pt-BR">
<head>
    <meta charset="UTF-8">
    <title>Lembrete de Consulta - {clinic_name}</title>
</head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
        <div style="background-color: #f59e0b; color: white; padding: 20px; text-align: center;">
            <h1>{clinic_name}</h1>
            <p>Lembrete de Consulta</p>
        </div>
        <div style="padding: 20px; background-color: #f9fafb;">
            <h2>Olá, {name}!</h2>
            <p>Este é um lembrete de que sua consulta está marcada para daqui a {phrase}.</p>
            <div style="background-color: white; padding: 15px; border-radius: 8px;">
                <h3>Detalhes da Consulta</h3>
                <p><strong>Data:</strong> {day_name}, {date}</p>
                <p><strong>Horário:</strong> {time}</p>
                <p><strong>Local:</strong> {clinic_name}</p>
                <p><strong>Médico:</strong> {doctor}</p>
            </div>
            <div style="background-color: #fef3c7; padding: 15px; border-radius: 8px;">
                <h4>Lembre-se:</h4>
                <ul>
                    <li>Chegue com 15 minutos de antecedência</li>
                    <li>Traga um documento com foto</li>
                    <li>Traga seus óculos ou lentes de contato atuais</li>
                </ul>
            </div>
            <p>Caso precise cancelar ou reagendar, entre em contato conosco o quanto antes.</p>
            <p>📞 Telefone: {clinic_phone}<br>
               📧 Email: {clinic_email}</p>
        </div>
        <div style="text-align: center; padding: 20px; font-size: 12px; color: #6b7280;">
            <p>{clinic_name}</p>
        </div>
    </div>
</body>
</html>"#,
        clinic_name = clinic.name,
        doctor = clinic.doctor,
        clinic_phone = clinic.phone,
        clinic_email = clinic.email,
        day_name = summary.day_name,
        date = summary.date,
        time = summary.time,
    ))
}

/// Compact SMS reminder, capped at [`SMS_MAX_CHARS`].
pub fn generate_reminder_sms_content(
    clinic: &ClinicConfig,
    ctx: &TemplateContext,
    lead_hours: u32,
) -> Result<String> {
    let name = ctx.validate()?;
    let summary = ctx.summary();

    let body = format!(
        "{clinic_name}: Lembrete! {name}, sua consulta é em {tag} - {day_name}, {date} às {time}. Chegue 15min antes. Tel: {phone}",
        clinic_name = clinic.name,
        tag = lead_tag(lead_hours),
        day_name = summary.day_name,
        date = summary.date,
        time = summary.time,
        phone = clinic.phone,
    );
    Ok(truncate_sms(body))
}

/// HTML email confirming a fresh booking, with the arrival checklist and
/// the reminder-cadence notice.
fn generate_confirmation_email_content(
    clinic: &ClinicConfig,
    ctx: &TemplateContext,
) -> Result<String> {
    let name = ctx.validate()?;
    let summary = ctx.summary();

    Ok(format!(
        r#"<!DOCTYPE html>
<html lang="pt-BR">
<head>
    <meta charset="UTF-8">
    <title>Confirmação de Consulta - {clinic_name}</title>
</head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
        <div style="background-color: #2563eb; color: white; padding: 20px; text-align: center;">
            <h1>{clinic_name}</h1>
            <p>Confirmação de Consulta</p>
        </div>
        <div style="padding: 20px; background-color: #f9fafb;">
            <h2>Olá, {name}!</h2>
            <p>Sua consulta foi agendada com sucesso. Confira os detalhes abaixo:</p>
            <div style="background-color: white; padding: 15px; border-radius: 8px;">
                <h3>Detalhes da Consulta</h3>
                <p><strong>Data:</strong> {day_name}, {date}</p>
                <p><strong>Horário:</strong> {time}</p>
                <p><strong>Local:</strong> {clinic_name}</p>
                <p><strong>Médico:</strong> {doctor}</p>
            </div>
            <div style="background-color: #fef3c7; padding: 15px; border-radius: 8px;">
                <h4>Importante:</h4>
                <ul>
                    <li>Chegue com 15 minutos de antecedência</li>
                    <li>Traga um documento com foto</li>
                    <li>Traga seus óculos ou lentes de contato atuais</li>
                    <li>Se usar colírios, traga a receita</li>
                </ul>
            </div>
            <p>Você receberá lembretes por email e SMS 24 horas e 2 horas antes da consulta.</p>
            <p>Em caso de dúvidas, entre em contato conosco:</p>
            <p>📞 Telefone: {clinic_phone}<br>
               📧 Email: {clinic_email}</p>
        </div>
        <div style="text-align: center; padding: 20px; font-size: 12px; color: #6b7280;">
            <p>{clinic_name}</p>
            <p>Este é um email automático, não responda a esta mensagem.</p>
        </div>
    </div>
</body>
</html>"#,
        clinic_name = clinic.name,
        doctor = clinic.doctor,
        clinic_phone = clinic.phone,
        clinic_email = clinic.email,
        day_name = summary.day_name,
        date = summary.date,
        time = summary.time,
    ))
}

/// Compact SMS confirmation, capped at [`SMS_MAX_CHARS`].
fn generate_confirmation_sms_content(clinic: &ClinicConfig, ctx: &TemplateContext) -> Result<String> {
    let name = ctx.validate()?;
    let summary = ctx.summary();

    let body = format!(
        "{clinic_name}: Olá {name}! Sua consulta foi agendada para {day_name}, {date} às {time}. Chegue 15min antes.",
        clinic_name = clinic.name,
        day_name = summary.day_name,
        date = summary.date,
        time = summary.time,
    );
    Ok(truncate_sms(body))
}

/// Human-readable lead-time phrase for email copy: "24 horas", "2 horas".
fn lead_phrase(hours: u32) -> String {
    if hours == 1 {
        "1 hora".to_string()
    } else {
        format!("{hours} horas")
    }
}

/// Compact lead tag for SMS copy: "24h", "2h".
fn lead_tag(hours: u32) -> String {
    format!("{hours}h")
}

/// Enforce the SMS length contract by character count (not bytes — the
/// templates contain accented pt-BR text).
fn truncate_sms(body: String) -> String {
    if body.chars().count() <= SMS_MAX_CHARS {
        return body;
    }
    body.chars().take(SMS_MAX_CHARS).collect()
}
