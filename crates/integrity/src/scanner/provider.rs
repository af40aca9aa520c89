// The scanner's view of live document state.

use anyhow::Result;

use scriptum_common::types::AnnotationScanData;

/// Implemented by the editor's document layer. Every call must reflect the
/// document as it is right now. Errors propagate out of the scan untouched;
/// a failed scan means "not completed", never "clean".
pub trait DocumentStateProvider {
    /// Every annotation in the document.
    fn annotations(&self) -> Result<Vec<AnnotationScanData>>;

    /// Annotations touching any of `block_ids` through a span or chain.
    fn annotations_in_blocks(&self, block_ids: &[String]) -> Result<Vec<AnnotationScanData>> {
        Ok(self
            .annotations()?
            .into_iter()
            .filter(|anno| anno.block_ids().any(|id| block_ids.iter().any(|dirty| dirty == id)))
            .collect())
    }

    /// Current text of a span, or `None` if the block or span is gone.
    fn span_text(&self, block_id: &str, span_id: &str) -> Result<Option<String>>;

    /// Block ids in document order.
    fn block_order(&self) -> Result<Vec<String>>;
}

impl<P: DocumentStateProvider + ?Sized> DocumentStateProvider for &P {
    fn annotations(&self) -> Result<Vec<AnnotationScanData>> {
        (**self).annotations()
    }

    fn annotations_in_blocks(&self, block_ids: &[String]) -> Result<Vec<AnnotationScanData>> {
        (**self).annotations_in_blocks(block_ids)
    }

    fn span_text(&self, block_id: &str, span_id: &str) -> Result<Option<String>> {
        (**self).span_text(block_id, span_id)
    }

    fn block_order(&self) -> Result<Vec<String>> {
        (**self).block_order()
    }
}
