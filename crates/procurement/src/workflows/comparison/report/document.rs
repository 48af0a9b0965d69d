use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;

use crate::workflows::comparison::domain::RankedOffer;
use crate::workflows::comparison::repository::{
    ComparisonDocument, RenderError, RenderedArtifact, ReportRenderer,
};

const CHART_WIDTH: f64 = 480.0;
const BAR_HEIGHT: u32 = 28;
const BAR_GAP: u32 = 12;
const LABEL_WIDTH: u32 = 180;

/// Writes self-contained HTML reports (inline SVG chart, no external assets)
/// into an artifact directory.
#[derive(Debug, Clone)]
pub struct HtmlReportRenderer {
    artifact_dir: PathBuf,
}

impl HtmlReportRenderer {
    pub fn new(artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }
}

#[async_trait]
impl ReportRenderer for HtmlReportRenderer {
    async fn render(
        &self,
        document: &ComparisonDocument,
    ) -> Result<RenderedArtifact, RenderError> {
        let html = render_comparison_html(document)
            .map_err(|err| RenderError::Backend(err.to_string()))?;

        tokio::fs::create_dir_all(&self.artifact_dir).await?;
        let file_name = format!(
            "comparison-{}-{}.html",
            file_safe(document.requisition_id.as_str()),
            file_safe(document.report_id.as_str())
        );
        let path = self.artifact_dir.join(file_name);
        tokio::fs::write(&path, html).await?;

        Ok(RenderedArtifact {
            path: path.to_string_lossy().into_owned(),
            content_type: mime::TEXT_HTML_UTF_8.to_string(),
        })
    }

    async fn read_artifact(&self, path: &str) -> Result<Vec<u8>, RenderError> {
        Ok(tokio::fs::read(path).await?)
    }
}

/// Bar colour per rank: L1 green, L2 amber, L3 orange, the rest grey.
pub(crate) fn rank_colour(rank: u32) -> &'static str {
    match rank {
        1 => "#2e7d32",
        2 => "#f9a825",
        3 => "#ef6c00",
        _ => "#9e9e9e",
    }
}

pub(crate) fn render_comparison_html(document: &ComparisonDocument) -> Result<String, fmt::Error> {
    let mut html = String::new();
    let title = escape(&document.requisition_title);

    writeln!(html, "<!DOCTYPE html>")?;
    writeln!(html, "<html lang=\"en\"><head><meta charset=\"utf-8\">")?;
    writeln!(html, "<title>Bid comparison: {title}</title>")?;
    writeln!(
        html,
        "<style>body{{font-family:sans-serif;margin:2rem;}}table{{border-collapse:collapse;}}\
         th,td{{border:1px solid #ccc;padding:4px 10px;text-align:left;}}</style>"
    )?;
    writeln!(html, "</head><body>")?;
    writeln!(html, "<h1>Bid comparison: {title}</h1>")?;
    writeln!(
        html,
        "<p>Requisition {} &middot; prepared for {} &middot; {} &middot; trigger {}</p>",
        escape(document.requisition_id.as_str()),
        escape(&document.owner_name),
        document.generated_at.format("%Y-%m-%d %H:%M UTC"),
        document.trigger_label
    )?;
    writeln!(
        html,
        "<p>{} vendors invited, {} completed, {} excluded.</p>",
        document.total_vendors, document.completed_vendors, document.excluded_vendors
    )?;

    write_price_chart(&mut html, &document.offers)?;
    write_offer_table(&mut html, &document.offers)?;

    writeln!(html, "</body></html>")?;
    Ok(html)
}

fn write_price_chart(html: &mut String, offers: &[RankedOffer]) -> fmt::Result {
    let max_price = offers
        .iter()
        .filter_map(|offer| offer.total_price.to_f64())
        .fold(0.0_f64, f64::max);
    let height = offers.len() as u32 * (BAR_HEIGHT + BAR_GAP) + BAR_GAP;
    let width = LABEL_WIDTH + CHART_WIDTH as u32 + 140;

    writeln!(
        html,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" \
         role=\"img\" aria-label=\"Total price by vendor\">"
    )?;
    for (index, offer) in offers.iter().enumerate() {
        let y = BAR_GAP + index as u32 * (BAR_HEIGHT + BAR_GAP);
        let price = offer.total_price.to_f64().unwrap_or(0.0);
        let bar = if max_price > 0.0 {
            (price / max_price * CHART_WIDTH).max(1.0)
        } else {
            1.0
        };
        let text_y = y + BAR_HEIGHT / 2 + 5;

        writeln!(
            html,
            "<text x=\"0\" y=\"{text_y}\" font-size=\"13\">{} {}</text>",
            offer.label(),
            escape(&offer.vendor_name)
        )?;
        writeln!(
            html,
            "<rect x=\"{LABEL_WIDTH}\" y=\"{y}\" width=\"{bar:.1}\" height=\"{BAR_HEIGHT}\" fill=\"{}\"/>",
            rank_colour(offer.rank)
        )?;
        writeln!(
            html,
            "<text x=\"{:.1}\" y=\"{text_y}\" font-size=\"13\">{}</text>",
            f64::from(LABEL_WIDTH) + bar + 8.0,
            offer.total_price
        )?;
    }
    writeln!(html, "</svg>")
}

fn write_offer_table(html: &mut String, offers: &[RankedOffer]) -> fmt::Result {
    writeln!(html, "<table>")?;
    writeln!(
        html,
        "<tr><th>Rank</th><th>Vendor</th><th>Total price</th><th>Unit price</th>\
         <th>Payment terms</th><th>Delivery</th><th>Utility</th><th>Score</th></tr>"
    )?;
    for offer in offers {
        let delivery = offer
            .delivery_date
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "n/a".to_string());
        let utility = offer
            .utility_score
            .map(|score| format!("{score:.2}"))
            .unwrap_or_else(|| "n/a".to_string());
        writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.2}</td></tr>",
            offer.label(),
            escape(&offer.vendor_name),
            offer.total_price,
            offer.unit_price,
            escape(&offer.payment_terms),
            delivery,
            utility,
            offer.score
        )?;
    }
    writeln!(html, "</table>")
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn file_safe(raw: &str) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
