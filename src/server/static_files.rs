pub const INDEX_HTML: &str = include_str!("../../static/index.html");
pub const STYLE_CSS: &str = include_str!("../../static/style.css");
pub const APP_JS: &str = include_str!("../../static/app.js");
