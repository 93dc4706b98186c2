pub struct Icons;

impl Icons {
    pub const MAIL: &str = "📬";
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const STATS: &str = "📊";
    pub const DATABASE: &str = "🗄️";
    pub const DEL: &str = "🗑️";
    pub const GEAR: &str = "⚙️";
    pub const STAR: &str = "⭐";
    pub const HOURGLASS: &str = "⏳";
    pub const FORWARD: &str = "📤";
    pub const MAG: &str = "🔎";
}
