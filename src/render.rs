use pulldown_cmark::{html, Options, Parser};

use crate::campaign::{Campaign, ContentType};

pub fn render_markdown(source: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(source, options);
    let mut output = String::new();
    html::push_html(&mut output, parser);

    output
}

// rendering happens once per campaign, never per recipient
pub fn render_email(campaign: &Campaign) -> String {
    let content = match campaign.content_type {
        ContentType::Markdown => render_markdown(&campaign.content),
        ContentType::Html => campaign.content.clone(),
    };

    let accent_color = campaign
        .template
        .accent_color
        .as_deref()
        .unwrap_or("#333333");

    let mut body = String::new();
    body.push_str("<html><body style=\"margin:0;padding:0;\">");
    if let Some(header_image) = &campaign.template.header_image {
        body.push_str(&format!(
            "<img src=\"{}\" alt=\"{}\" style=\"max-width:100%;\">",
            header_image, campaign.title
        ));
    }
    body.push_str(&format!(
        "<h1 style=\"color:{};\">{}</h1>",
        accent_color, campaign.title
    ));
    body.push_str(&content);
    if let Some(footer_text) = &campaign.template.footer_text {
        body.push_str(&format!("<p style=\"color:#888888;\">{}</p>", footer_text));
    }
    body.push_str("<p style=\"color:#888888;font-size:12px;\">You received this email because you subscribed to this newsletter.</p>");
    body.push_str("</body></html>");

    body
}
