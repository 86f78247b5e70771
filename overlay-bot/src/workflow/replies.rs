//! User-facing texts.

use super::dimensions::DimensionLimits;
use super::transition::Reply;

pub const WELCOME: &str = "\
🤖 Welcome to Background Removal Bot!

I can help you remove backgrounds from product images and overlay them on your templates.

📋 Here's how it works:
1. First, send me a template image
2. I'll set it as your template
3. Then send me product images
4. I'll remove the background and overlay on your template

📸 Please send your template image now:";

pub const DOWNLOADING_TEMPLATE: &str = "📥 Downloading template image...";
pub const DOWNLOADING_PRODUCT: &str = "📥 Downloading product image...";

pub const TEMPLATE_SET: &str = "✅ Template set successfully!\n\n\
Now, send me your product images. Type 'done' when you've sent all of them.";

pub const TEMPLATE_ERROR: &str = "❌ Error processing template. Please try again.";
pub const PRODUCT_ERROR: &str = "❌ Error processing product image.";
pub const INVALID_IMAGE: &str = "❌ Invalid image format.";
pub const NO_IMAGES: &str = "❌ No images to process. Please send product images first.";
pub const INVALID_DIMENSIONS: &str =
    "❌ Invalid format. Please use: width x height (e.g., 500x500)";
pub const MISSING_INPUTS: &str = "❌ Missing images or template. Please /start over.";
pub const FOLLOW_UP: &str = "Send more product images, or /start to use a new template.";
pub const GENERIC_ERROR: &str =
    "❌ An error occurred while processing your request. Please try again.";

pub fn product_received(count: usize) -> String {
    format!("✅ Product image {count} received!\n\nSend more, or type 'done' when finished.")
}

pub fn ask_dimensions(count: usize) -> String {
    format!(
        "✅ Great! You've sent {count} images.\n\n\
         📏 Now, please tell me the dimensions for the products.\n\
         Format: width x height (e.g., 400 x 600)"
    )
}

pub fn out_of_range(limits: &DimensionLimits) -> String {
    format!(
        "❌ Dimensions must be between {min}x{min} and {max}x{max}.",
        min = limits.min,
        max = limits.max
    )
}

pub fn file_too_large(max_mb: u64) -> String {
    format!("❌ File too large. Please send an image smaller than {max_mb}MB.")
}

pub fn progress(done: usize, total: usize) -> String {
    format!("⚙️ Processing {total} images... ({done}/{total})")
}

pub fn summary(succeeded: usize, failed: usize) -> String {
    format!("🎉 Processing Complete! ✅ Success: {succeeded}, ❌ Failed: {failed}")
}

impl Reply {
    pub const fn text(self) -> &'static str {
        match self {
            Self::StartFirst => "Please use /start command first.",
            Self::ImagesOnly => "Please send only image files.",
            Self::Idle => "I'm waiting for an image or a specific command. Use /start to begin.",
        }
    }
}
