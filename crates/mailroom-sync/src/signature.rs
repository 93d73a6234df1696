//! Cheap change detection over the merged timeline.

use mailroom_store::TimelineItem;
use ring::digest::{Context, SHA256};

/// SHA-256 digest over the render-relevant fields of a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 32]);

impl Signature {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Hash id, direction, kind, timestamp, text, caption, file path and the
/// processed flag of every item, in order.
///
/// Every field is length-prefixed so adjacent fields cannot run together.
pub fn timeline_signature(items: &[TimelineItem]) -> Signature {
    let mut ctx = Context::new(&SHA256);
    ctx.update(&(items.len() as u64).to_le_bytes());
    for item in items {
        ctx.update(&item.id.to_le_bytes());
        field(&mut ctx, Some(item.direction.as_str()));
        field(&mut ctx, Some(item.kind.as_str()));
        field(&mut ctx, Some(&item.timestamp));
        field(&mut ctx, item.text.as_deref());
        field(&mut ctx, item.caption.as_deref());
        field(&mut ctx, item.file_path.as_deref());
        let processed: u8 = match item.processed {
            None => 0,
            Some(false) => 1,
            Some(true) => 2,
        };
        ctx.update(&[processed]);
    }
    let digest = ctx.finish();
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_ref());
    Signature(out)
}

fn field(ctx: &mut Context, value: Option<&str>) {
    match value {
        None => ctx.update(&[0]),
        Some(s) => {
            ctx.update(&[1]);
            ctx.update(&(s.len() as u64).to_le_bytes());
            ctx.update(s.as_bytes());
        }
    }
}
