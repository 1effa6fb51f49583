//! MIME-type dispatch over the attachment processors.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ProcessingConfig;
use crate::extract::{
    OcrEngine, OoxmlWordEngine, OoxmlWorkbookEngine, PdfEngine, PdfExtractEngine, TesseractCli,
    WordEngine, WorkbookEngine, MIME_OCTET_STREAM,
};
use crate::models::ExtractedContent;
use crate::processors::{
    AttachmentProcessor, DocxProcessor, FallbackProcessor, ImageProcessor, PdfProcessor,
    SpreadsheetProcessor,
};

/// Engines handed to the default processors. `None` means the capability is
/// not installed and the matching processor reports it per attachment.
#[derive(Clone)]
pub struct Engines {
    pub ocr: Option<Arc<dyn OcrEngine>>,
    pub ocr_languages: String,
    pub pdf: Option<Arc<dyn PdfEngine>>,
    pub word: Option<Arc<dyn WordEngine>>,
    pub workbook: Option<Arc<dyn WorkbookEngine>>,
}

impl Engines {
    /// Built-in engines, probing for `tesseract` when OCR is enabled.
    pub fn detect(config: &ProcessingConfig) -> Self {
        let ocr = if config.ocr_enabled {
            let found = TesseractCli::detect();
            if found.is_none() {
                info!("tesseract not found; image attachments will not be OCR'd");
            }
            found.map(|t| Arc::new(t) as Arc<dyn OcrEngine>)
        } else {
            None
        };
        Self {
            ocr,
            ocr_languages: config.ocr_languages.clone(),
            pdf: Some(Arc::new(PdfExtractEngine)),
            word: Some(Arc::new(OoxmlWordEngine)),
            workbook: Some(Arc::new(OoxmlWorkbookEngine)),
        }
    }
}

pub struct ProcessorFactory {
    processors: HashMap<String, Arc<dyn AttachmentProcessor>>,
    fallback: Arc<dyn AttachmentProcessor>,
}

impl ProcessorFactory {
    pub fn new(config: &ProcessingConfig) -> Self {
        Self::with_engines(Engines::detect(config))
    }

    pub fn with_engines(engines: Engines) -> Self {
        let defaults: Vec<Arc<dyn AttachmentProcessor>> = vec![
            Arc::new(ImageProcessor::new(engines.ocr, engines.ocr_languages)),
            Arc::new(PdfProcessor::new(engines.pdf)),
            Arc::new(DocxProcessor::new(engines.word)),
            Arc::new(SpreadsheetProcessor::new(engines.workbook)),
        ];

        let mut processors = HashMap::new();
        for processor in defaults {
            for mime in processor.supported_types() {
                processors.insert(mime.to_string(), Arc::clone(&processor));
            }
        }
        Self {
            processors,
            fallback: Arc::new(FallbackProcessor),
        }
    }

    /// Add or replace the processor for one MIME type.
    pub fn register_processor(
        &mut self,
        mime_type: impl Into<String>,
        processor: Arc<dyn AttachmentProcessor>,
    ) {
        self.processors.insert(mime_type.into(), processor);
    }

    /// Exact MIME match, then a guess from `filename`, then the fallback.
    pub fn get_processor(
        &self,
        mime_type: &str,
        filename: Option<&str>,
    ) -> Arc<dyn AttachmentProcessor> {
        if let Some(processor) = self.processors.get(mime_type) {
            return Arc::clone(processor);
        }
        let guessed = filename
            .and_then(|name| mime_guess::from_path(name).first_raw())
            .and_then(|guess| self.processors.get(guess));
        match guessed {
            Some(processor) => Arc::clone(processor),
            None => Arc::clone(&self.fallback),
        }
    }

    pub fn process_file(&self, path: &Path, mime_type: Option<&str>) -> ExtractedContent {
        let mime = mime_type
            .map(str::to_string)
            .or_else(|| mime_guess::from_path(path).first_raw().map(str::to_string))
            .unwrap_or_else(|| MIME_OCTET_STREAM.to_string());
        let filename = path.file_name().and_then(|n| n.to_str());
        let processor = self.get_processor(&mime, filename);
        debug!(
            path = %path.display(),
            mime = %mime,
            processor = processor.name(),
            "processing attachment"
        );
        // A panicking processor costs only this attachment.
        match panic::catch_unwind(AssertUnwindSafe(|| processor.process(path))) {
            Ok(content) => content,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                warn!(
                    path = %path.display(),
                    processor = processor.name(),
                    reason = %reason,
                    "processor panicked"
                );
                ExtractedContent::failure(format!(
                    "{} extraction failed: {}",
                    processor.name(),
                    reason
                ))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "processor panicked".to_string()
    }
}
