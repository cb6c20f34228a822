//! 邮件模板。
//!
//! 按告警级别内置三套模板，外加一套恢复通知模板。渲染只做占位符替换，
//! 未知占位符原样保留。

use chrono::{DateTime, Utc};
use flux_types::{Alert, AlertSeverity};
use serde::{Deserialize, Serialize};

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// 告警创建
    Alert,
    /// 告警恢复
    Resolved,
    /// 测试邮件
    Test,
}

/// 邮件模板
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// 渲染后的邮件内容
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl EmailTemplate {
    pub fn render(&self, alert: &Alert, now: DateTime<Utc>) -> RenderedEmail {
        RenderedEmail {
            subject: render(&self.subject, alert, now),
            html: render(&self.html, alert, now),
            text: render(&self.text, alert, now),
        }
    }
}

/// 模板集合
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSet {
    pub critical: EmailTemplate,
    pub warning: EmailTemplate,
    pub info: EmailTemplate,
    pub resolved: EmailTemplate,
}

impl TemplateSet {
    pub fn for_severity(&self, severity: AlertSeverity) -> &EmailTemplate {
        match severity {
            AlertSeverity::Critical => &self.critical,
            AlertSeverity::Warning => &self.warning,
            AlertSeverity::Info => &self.info,
        }
    }

    /// 选择模板并渲染；测试邮件使用 info 模板
    pub fn render(&self, kind: NotificationKind, alert: &Alert, now: DateTime<Utc>) -> RenderedEmail {
        let template = match kind {
            NotificationKind::Alert => self.for_severity(alert.severity),
            NotificationKind::Resolved => &self.resolved,
            NotificationKind::Test => &self.info,
        };
        template.render(alert, now)
    }
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self {
            critical: alert_template(
                "[CRITICAL] {{alert.title}}",
                "#b91c1c",
                "Immediate action required.",
            ),
            warning: alert_template(
                "[WARNING] {{alert.title}}",
                "#b45309",
                "Please investigate soon.",
            ),
            info: alert_template("[INFO] {{alert.title}}", "#1d4ed8", "For your information."),
            resolved: EmailTemplate {
                subject: "[RESOLVED] {{alert.title}}".to_string(),
                html: concat!(
                    "<div style=\"font-family:sans-serif\">",
                    "<h2 style=\"color:#15803d\">Resolved: {{alert.title}}</h2>",
                    "<p>{{alert.message}}</p>",
                    "<table>",
                    "<tr><td>Alert ID</td><td>{{alert.id}}</td></tr>",
                    "<tr><td>Severity</td><td>{{alert.severity}}</td></tr>",
                    "<tr><td>Source</td><td>{{alert.source}}</td></tr>",
                    "<tr><td>Raised at</td><td>{{alert.created_at}}</td></tr>",
                    "<tr><td>Resolved at</td><td>{{datetime}}</td></tr>",
                    "</table></div>"
                )
                .to_string(),
                text: concat!(
                    "Resolved: {{alert.title}}\n\n",
                    "{{alert.message}}\n\n",
                    "Alert ID: {{alert.id}}\n",
                    "Severity: {{alert.severity}}\n",
                    "Source: {{alert.source}}\n",
                    "Raised at: {{alert.created_at}}\n",
                    "Resolved at: {{datetime}}\n"
                )
                .to_string(),
            },
        }
    }
}

fn alert_template(subject: &str, color: &str, call_to_action: &str) -> EmailTemplate {
    let html = format!(
        concat!(
            "<div style=\"font-family:sans-serif\">",
            "<h2 style=\"color:{color}\">{{{{alert.title}}}}</h2>",
            "<p>{{{{alert.message}}}}</p>",
            "<table>",
            "<tr><td>Alert ID</td><td>{{{{alert.id}}}}</td></tr>",
            "<tr><td>Severity</td><td>{{{{alert.severity}}}}</td></tr>",
            "<tr><td>Source</td><td>{{{{alert.source}}}}</td></tr>",
            "<tr><td>Raised at</td><td>{{{{alert.created_at}}}}</td></tr>",
            "</table>",
            "<p>{cta}</p>",
            "<p style=\"color:#6b7280\">Sent {{{{date}}}} at {{{{time}}}}</p>",
            "</div>"
        ),
        color = color,
        cta = call_to_action,
    );
    let text = format!(
        concat!(
            "{{{{alert.title}}}}\n\n",
            "{{{{alert.message}}}}\n\n",
            "Alert ID: {{{{alert.id}}}}\n",
            "Severity: {{{{alert.severity}}}}\n",
            "Source: {{{{alert.source}}}}\n",
            "Raised at: {{{{alert.created_at}}}}\n\n",
            "{cta}\n",
            "Sent {{{{datetime}}}}\n"
        ),
        cta = call_to_action,
    );

    EmailTemplate {
        subject: subject.to_string(),
        html,
        text,
    }
}

/// 渲染模板文本
pub fn render(template: &str, alert: &Alert, now: DateTime<Utc>) -> String {
    let replacements: [(&str, String); 9] = [
        ("{{alert.title}}", alert.title.clone()),
        ("{{alert.message}}", alert.message.clone()),
        ("{{alert.severity}}", alert.severity.to_string()),
        ("{{alert.source}}", alert.source.clone()),
        (
            "{{alert.created_at}}",
            alert.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
        ("{{alert.id}}", alert.id.to_string()),
        ("{{datetime}}", now.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ("{{date}}", now.format("%Y-%m-%d").to_string()),
        ("{{time}}", now.format("%H:%M:%S").to_string()),
    ];

    // 单遍扫描，避免替换值中的占位符被二次展开
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match replacements.iter().find(|(token, _)| tail.starts_with(token)) {
            Some((token, value)) => {
                out.push_str(value);
                rest = &tail[token.len()..];
            }
            None => {
                out.push_str("{{");
                rest = &tail[2..];
            }
        }
    }
    out.push_str(rest);
    out
}
