//! Assessment orchestrator: drives every stage for one submission.
//!
//! load → preprocess (all pages) → segment + OCR (per page) → verify content
//! → handwriting mechanics → gate → score.
//!
//! Collaborators (OCR, secondary verifier, PDF renderer) are injected as
//! trait objects so the whole pipeline runs against mocks in tests.
//! Cancellation is checked between stages and yields `Cancelled`, not an error.

use chrono::Utc;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use super::content_verify::verify_content;
use super::line_segment::segment_lines;
use super::mechanics::check_mechanics;
use super::ocr::OcrProvider;
use super::page_loader::{PageLoader, PageSource};
use super::preprocess::analyze_page;
use super::progress::{CancellationToken, ProgressEvent, ProgressTracker, Stage};
use super::quality_gate::{evaluate_gate, GateInputs};
use super::reconcile::PageLines;
use super::scoring::compute_score;
use super::secondary::{apply_secondary_verification, LineVerifier};
use super::types::{
    DetectedLine, ExtractedLine, Finding, PageRaster, QualityGate, ScoreBreakdown,
};
use super::AssessmentError;
use crate::models::{AssessmentReport, AssignmentSpec, LineSummary, PageSummary};
use crate::pipeline_config::AssessmentConfig;

/// How a run ended. Cancellation carries the stage that did not start.
#[derive(Debug)]
pub enum AssessmentOutcome {
    Completed(Box<AssessmentReport>),
    Cancelled { stage: Stage },
}

impl AssessmentOutcome {
    pub fn report(&self) -> Option<&AssessmentReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Cancelled { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Runs the assessment pipeline with injected collaborators.
pub struct Assessor {
    loader: PageLoader,
    ocr: Box<dyn OcrProvider>,
    verifier: Option<Box<dyn LineVerifier>>,
    config: AssessmentConfig,
}

macro_rules! checkpoint {
    ($cancel:expr, $stage:expr) => {
        if $cancel.is_cancelled() {
            info!(stage = %$stage, "Assessment cancelled");
            return Ok(AssessmentOutcome::Cancelled { stage: $stage });
        }
    };
}

impl Assessor {
    pub fn new(ocr: Box<dyn OcrProvider>, config: AssessmentConfig) -> Self {
        Self {
            loader: PageLoader::new().with_render_dpi(config.render_dpi),
            ocr,
            verifier: None,
            config,
        }
    }

    pub fn with_page_loader(mut self, loader: PageLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_line_verifier(mut self, verifier: Box<dyn LineVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Assess one submission.
    ///
    /// Returns `Err` only for malformed input (unreadable upload, invalid
    /// assignment). Rejected images and OCR failures produce a complete
    /// report with an `ungradable` gate.
    pub fn run(
        &self,
        sources: &[PageSource],
        spec: &AssignmentSpec,
        cancel: &CancellationToken,
        progress: Option<&dyn Fn(ProgressEvent)>,
    ) -> Result<AssessmentOutcome, AssessmentError> {
        spec.validate()?;
        let span = info_span!(
            "assessment",
            uploads = sources.len(),
            required = spec.required_line_count
        );
        let _guard = span.enter();
        let mut tracker = ProgressTracker::new(progress);

        // ── Load ──
        checkpoint!(cancel, Stage::Loading);
        let pages = self.loader.load(sources)?;
        tracker.set_page_count(pages.len());
        tracker.step(Stage::Loading, None);
        info!(pages = pages.len(), "Pages loaded");

        // ── Preprocess all pages before any downstream read ──
        checkpoint!(cancel, Stage::Preprocessing);
        let mut rasters = Vec::with_capacity(pages.len());
        let mut summaries = Vec::with_capacity(pages.len());
        let mut rejections = Vec::new();
        for page in pages {
            let index = page.page_index();
            let outcome = analyze_page(page, &self.config.preprocess);
            for reason in &outcome.rejections {
                warn!(page = index, reason = %reason, "Page rejected");
                rejections.push(format!("Page {}: {}", index + 1, reason));
            }
            summaries.push(PageSummary {
                page_index: index,
                width: outcome.raster.width(),
                height: outcome.raster.height(),
                metrics: outcome.metrics,
                rejections: outcome.rejections,
                contrast_corrected: outcome.corrected,
                detected_line_count: 0,
            });
            rasters.push(outcome.raster);
            tracker.step(Stage::Preprocessing, Some(index));
        }

        if !rejections.is_empty() {
            let gate = evaluate_gate(&GateInputs {
                rejections: &rejections,
                ocr_failures: &[],
                lines: &[],
                required_line_count: spec.required_line_count,
                uncertain_count: 0,
                findings: &[],
            });
            info!(rejections = rejections.len(), "Submission rejected before recognition");
            tracker.finish(Stage::Scoring);
            return Ok(AssessmentOutcome::Completed(Box::new(build_report(
                spec,
                summaries,
                &[],
                0,
                gate,
                Vec::new(),
                ScoreBreakdown::zero(),
            ))));
        }

        // ── Segment + OCR, page by page ──
        let expected_per_page = spec.required_line_count.div_ceil(rasters.len().max(1));
        let mut page_lines: Vec<PageLines> = Vec::with_capacity(rasters.len());
        let mut next_line_index = 0;
        let mut detected_line_count = 0;

        for raster in &rasters {
            let index = raster.page_index();
            let page_span = info_span!("page", index);
            let _page_guard = page_span.enter();

            checkpoint!(cancel, Stage::Segmenting);
            let detected = segment_lines(raster, expected_per_page, &self.config.segment);
            detected_line_count += detected.len();
            summaries[index].detected_line_count = detected.len();
            tracker.step(Stage::Segmenting, Some(index));

            checkpoint!(cancel, Stage::Recognizing);
            let lines = self.recognize_page(raster, next_line_index, &detected);
            next_line_index += lines.lines.len();
            page_lines.push(lines);
            tracker.step(Stage::Recognizing, Some(index));
        }
        checkpoint!(cancel, Stage::Verifying);

        let ocr_failures: Vec<String> = page_lines
            .iter()
            .filter_map(|p| {
                p.ocr_failure
                    .as_ref()
                    .map(|e| format!("page {}: {}", p.page_index + 1, e))
            })
            .collect();
        let lines: Vec<ExtractedLine> = page_lines.into_iter().flat_map(|p| p.lines).collect();
        info!(
            detected = detected_line_count,
            extracted = lines.len(),
            ocr_failures = ocr_failures.len(),
            "Lines extracted"
        );

        // ── Content ──
        let verification = verify_content(&lines, &spec.expected_lines);
        let secondary = self
            .verifier
            .as_ref()
            .filter(|_| self.config.secondary_verification);
        let (mut findings, uncertain_count) = match secondary {
            Some(verifier) => apply_secondary_verification(
                &**verifier,
                verification.findings,
                verification.uncertain_count,
                &lines,
                &rasters,
            ),
            None => (verification.findings, verification.uncertain_count),
        };
        tracker.step(Stage::Verifying, None);

        // ── Handwriting ──
        checkpoint!(cancel, Stage::CheckingHandwriting);
        findings.extend(check_mechanics(&lines, &rasters, &self.config.mechanics));
        tracker.step(Stage::CheckingHandwriting, None);

        // ── Gate ──
        checkpoint!(cancel, Stage::Gating);
        let gate = evaluate_gate(&GateInputs {
            rejections: &[],
            ocr_failures: &ocr_failures,
            lines: &lines,
            required_line_count: spec.required_line_count,
            uncertain_count,
            findings: &findings,
        });
        tracker.step(Stage::Gating, None);

        // ── Score ──
        checkpoint!(cancel, Stage::Scoring);
        let scores = compute_score(&gate, lines.len(), spec.required_line_count, &findings);
        tracker.finish(Stage::Scoring);

        info!(
            status = gate.status.as_str(),
            findings = findings.len(),
            overall = scores.overall,
            "Assessment complete"
        );

        Ok(AssessmentOutcome::Completed(Box::new(build_report(
            spec,
            summaries,
            &lines,
            detected_line_count,
            gate,
            findings,
            scores,
        ))))
    }

    /// Call the OCR collaborator for one page. Failures are kept, not raised.
    fn recognize_page(
        &self,
        raster: &PageRaster,
        first_line_index: usize,
        detected: &[DetectedLine],
    ) -> PageLines {
        let index = raster.page_index();
        let _span = info_span!("ocr", page = index).entered();

        let response = raster
            .encode_png()
            .and_then(|png| self.ocr.recognize(index, &png));
        match response {
            Ok(response) => PageLines::from_response(
                index,
                first_line_index,
                detected,
                &response,
                (raster.width(), raster.height()),
            ),
            Err(e) => {
                warn!(page = index, error = %e, "OCR failed, continuing without text");
                PageLines::from_failure(index, first_line_index, detected, e.to_string())
            }
        }
    }
}

fn build_report(
    spec: &AssignmentSpec,
    pages: Vec<PageSummary>,
    lines: &[ExtractedLine],
    detected_line_count: usize,
    quality_gate: QualityGate,
    findings: Vec<Finding>,
    scores: ScoreBreakdown,
) -> AssessmentReport {
    AssessmentReport {
        report_id: Uuid::new_v4().to_string(),
        generated_at: Utc::now(),
        assignment_id: spec.assignment_id.clone(),
        pages,
        lines: lines.iter().map(LineSummary::from).collect(),
        detected_line_count,
        quality_gate,
        findings,
        scores,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use image::RgbaImage;

    use super::*;
    use crate::pipeline::assessment::ocr::{
        FailingOcrProvider, MockOcrProvider, ReplayOcrProvider,
    };
    use crate::pipeline::assessment::secondary::{
        ConfidenceTier, MockLineVerifier, SecondaryVerdict,
    };
    use crate::pipeline::assessment::test_support::*;
    use crate::pipeline::assessment::types::{FindingType, GateStatus, OcrPageResponse};

    const LINE_H: u32 = 20;
    const GAP: u32 = 20;

    fn spec(lines: &[&str]) -> AssignmentSpec {
        AssignmentSpec::new(lines.iter().map(|l| l.to_string()).collect())
    }

    fn page_source(rows: u32) -> PageSource {
        PageSource::from_bytes(png_bytes(&written_page(300, rows, LINE_H, GAP)))
    }

    fn assessor(ocr: OcrPageResponse) -> Assessor {
        Assessor::new(Box::new(MockOcrProvider::new(ocr)), AssessmentConfig::default())
    }

    fn completed(outcome: AssessmentOutcome) -> AssessmentReport {
        match outcome {
            AssessmentOutcome::Completed(report) => *report,
            AssessmentOutcome::Cancelled { stage } => panic!("cancelled at {stage}"),
        }
    }

    /// Counts calls, returns nothing.
    struct CountingOcr(Arc<AtomicUsize>);

    impl OcrProvider for CountingOcr {
        fn recognize(&self, _: usize, _: &[u8]) -> Result<OcrPageResponse, AssessmentError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(OcrPageResponse::default())
        }
    }

    #[test]
    fn exact_text_scores_full_marks() {
        let texts = ["a brown fox", "jumps over", "lazy dogs"];
        let report = completed(
            assessor(ocr_for_rows(&texts, 0.95, LINE_H, GAP))
                .run(&[page_source(3)], &spec(&texts), &CancellationToken::new(), None)
                .unwrap(),
        );

        assert_eq!(report.quality_gate.status, GateStatus::Ok);
        assert!(report.findings.is_empty(), "{:?}", report.findings);
        assert_eq!(report.scores.overall, 100);
        assert_eq!(report.detected_line_count, 3);
        assert_eq!(report.lines[1].text, "jumps over");
    }

    #[test]
    fn blank_page_is_ungradable_with_sharp_blur_score() {
        let blank_page = PageSource::from_bytes(png_bytes(&blank(200, 200, 255)));
        let report = completed(
            Assessor::new(Box::new(MockOcrProvider::empty()), AssessmentConfig::default())
                .run(&[blank_page], &spec(&["a", "b", "c"]), &CancellationToken::new(), None)
                .unwrap(),
        );

        assert_eq!(report.pages[0].metrics.blur_score, 1.0);
        assert!(report.pages[0].rejections.is_empty());
        assert_eq!(report.detected_line_count, 3);
        assert_eq!(report.quality_gate.status, GateStatus::Ungradable);
        assert!(report.quality_gate.confidence_coverage < 0.6);
        assert_eq!(report.scores, ScoreBreakdown::zero());
    }

    #[test]
    fn ocr_failure_is_reported_not_raised() {
        let texts = ["a brown fox", "jumps over", "lazy dogs"];
        let report = completed(
            Assessor::new(
                Box::new(FailingOcrProvider::new("connection refused")),
                AssessmentConfig::default(),
            )
            .run(&[page_source(3)], &spec(&texts), &CancellationToken::new(), None)
            .unwrap(),
        );

        assert_eq!(report.quality_gate.status, GateStatus::Ungradable);
        assert_eq!(report.quality_gate.confidence_coverage, 0.0);
        assert!(report.quality_gate.reasons[0].contains("connection refused"));
        assert_eq!(report.lines.len(), 3);
        assert_eq!(report.scores, ScoreBreakdown::zero());
    }

    #[test]
    fn white_paper_scan_scores_full_marks() {
        let texts = ["a brown fox", "jumps over", "lazy dogs"];
        let scan = PageSource::from_bytes(png_bytes(&written_page_on(255, 300, 3, LINE_H, GAP)));
        let report = completed(
            assessor(ocr_for_rows(&texts, 0.95, LINE_H, GAP))
                .run(&[scan], &spec(&texts), &CancellationToken::new(), None)
                .unwrap(),
        );

        assert_eq!(report.pages[0].metrics.glare_score, 0.0);
        assert!(report.pages[0].rejections.is_empty());
        assert_eq!(report.quality_gate.status, GateStatus::Ok);
        assert!(report.findings.is_empty(), "{:?}", report.findings);
        assert_eq!(report.scores.overall, 100);
    }

    /// One line "it it" on white paper: the first pair is dotted and crossed,
    /// the second is not.
    fn it_it_page() -> RgbaImage {
        let mut page = blank(120, 100, 255);
        for (x, finished) in [(20, true), (54, false)] {
            // i: stem, dot above the glyph box
            fill_rect(&mut page, x + 5, 40, 2, 30, 0);
            // t: thin stem, bar through the upper body
            fill_rect(&mut page, x + 17, 40, 1, 30, 0);
            if finished {
                fill_rect(&mut page, x + 4, 27, 4, 4, 0);
                fill_rect(&mut page, x + 13, 46, 10, 2, 0);
            }
        }
        page
    }

    #[test]
    fn handwriting_mechanics_flow_into_score() {
        let texts = ["it it"];
        let report = completed(
            assessor(ocr_for_rows(&texts, 0.97, 30, 40))
                .run(
                    &[PageSource::from_bytes(png_bytes(&it_it_page()))],
                    &spec(&texts),
                    &CancellationToken::new(),
                    None,
                )
                .unwrap(),
        );

        assert_eq!(report.detected_line_count, 1);
        assert_eq!(report.lines[0].text, "it it");
        assert_eq!(report.quality_gate.status, GateStatus::Ok);

        let kinds: Vec<FindingType> = report.findings.iter().map(|f| f.finding_type).collect();
        assert_eq!(kinds, vec![FindingType::MissingIDot, FindingType::UncrossedT]);
        // Both findings point at the unfinished second word
        assert!(report.findings.iter().all(|f| f.bbox.x >= 54 && f.line_index == Some(0)));

        assert_eq!(report.scores.content, 100);
        assert_eq!(report.scores.handwriting, 90);
        // 20 + 50 + 27
        assert_eq!(report.scores.overall, 97);
    }

    #[test]
    fn rejected_page_skips_recognition() {
        // Off-white paper with a blown-out hotspot over most of the page
        let mut glare = blank(100, 100, 200);
        fill_rect(&mut glare, 0, 40, 100, 60, 255);
        fill_rect(&mut glare, 10, 10, 80, 10, 0);
        let calls = Arc::new(AtomicUsize::new(0));
        let assessor = Assessor::new(
            Box::new(CountingOcr(Arc::clone(&calls))),
            AssessmentConfig::default(),
        );

        let report = completed(
            assessor
                .run(
                    &[PageSource::from_bytes(png_bytes(&glare))],
                    &spec(&["a"]),
                    &CancellationToken::new(),
                    None,
                )
                .unwrap(),
        );

        assert_eq!(report.quality_gate.status, GateStatus::Ungradable);
        assert!(report.quality_gate.reasons[0].starts_with("Page 1: Glare"));
        assert!(report.lines.is_empty());
        assert_eq!(report.scores, ScoreBreakdown::zero());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn one_mismatched_line_of_four() {
        let expected = ["a brown fox", "jumps over", "lazy dogs", "run home"];
        let observed = ["a brown fox", "jumps over", "lazy dogs", "qqqqqqqq"];
        let report = completed(
            assessor(ocr_for_rows(&observed, 0.95, LINE_H, GAP))
                .run(&[page_source(4)], &spec(&expected), &CancellationToken::new(), None)
                .unwrap(),
        );

        assert_eq!(report.quality_gate.status, GateStatus::Ok);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].finding_type, FindingType::ContentMismatch);
        assert_eq!(report.findings[0].line_index, Some(3));
        assert_eq!(report.scores.content, 75);
    }

    #[test]
    fn pages_share_global_line_indices() {
        let first = ocr_for_rows(&["a brown fox", "jumps over"], 0.95, LINE_H, GAP);
        let second = ocr_for_rows(&["lazy dogs", "run home"], 0.95, LINE_H, GAP);
        let assessor = Assessor::new(
            Box::new(ReplayOcrProvider::new(vec![first, second])),
            AssessmentConfig::default(),
        );
        let expected = ["a brown fox", "jumps over", "lazy dogs", "run home"];

        let report = completed(
            assessor
                .run(
                    &[page_source(2), page_source(2)],
                    &spec(&expected),
                    &CancellationToken::new(),
                    None,
                )
                .unwrap(),
        );

        let indices: Vec<usize> = report.lines.iter().map(|l| l.line_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        let page_of: Vec<usize> = report.lines.iter().map(|l| l.page_index).collect();
        assert_eq!(page_of, vec![0, 0, 1, 1]);
        assert_eq!(report.quality_gate.status, GateStatus::Ok);
        assert_eq!(report.pages[1].detected_line_count, 2);
    }

    #[test]
    fn secondary_verifier_resolves_uncertain_line() {
        let texts = ["a brown fox", "jumps over", "lazy dogs"];
        let mut ocr = ocr_for_rows(&texts, 0.95, LINE_H, GAP);
        // Moderate confidence on the last line's symbols
        for word in ocr.words.iter_mut().filter(|w| w.bbox.y >= 100.0) {
            for symbol in &mut word.symbols {
                symbol.confidence = 0.8;
            }
        }
        let config = AssessmentConfig {
            secondary_verification: true,
            ..AssessmentConfig::default()
        };
        let verdict = SecondaryVerdict {
            transcription: "lazy dogs".into(),
            matches: true,
            tier: ConfidenceTier::High,
            reasoning: None,
        };

        let without = completed(
            Assessor::new(Box::new(MockOcrProvider::new(ocr.clone())), config.clone())
                .run(&[page_source(3)], &spec(&texts), &CancellationToken::new(), None)
                .unwrap(),
        );
        assert_eq!(without.quality_gate.status, GateStatus::Uncertain);

        let with = completed(
            Assessor::new(Box::new(MockOcrProvider::new(ocr)), config)
                .with_line_verifier(Box::new(MockLineVerifier::new(verdict)))
                .run(&[page_source(3)], &spec(&texts), &CancellationToken::new(), None)
                .unwrap(),
        );
        assert_eq!(with.quality_gate.status, GateStatus::Ok);
        assert!(with.findings.is_empty());
    }

    #[test]
    fn cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let outcome = assessor(OcrPageResponse::default())
            .run(&[page_source(1)], &spec(&["a"]), &token, None)
            .unwrap();
        assert!(matches!(outcome, AssessmentOutcome::Cancelled { stage: Stage::Loading }));
        assert!(outcome.report().is_none());
    }

    #[test]
    fn cancelled_mid_run_stops_before_ocr() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let assessor = Assessor::new(
            Box::new(CountingOcr(Arc::clone(&calls))),
            AssessmentConfig::default(),
        );
        let cancel_on_segment = |e: ProgressEvent| {
            if e.stage == Stage::Segmenting {
                token.cancel();
            }
        };

        let outcome = assessor
            .run(&[page_source(1)], &spec(&["a"]), &token, Some(&cancel_on_segment))
            .unwrap();

        assert!(matches!(outcome, AssessmentOutcome::Cancelled { stage: Stage::Recognizing }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn progress_is_monotonic_and_completes() {
        let seen = RefCell::new(Vec::new());
        let record = |e: ProgressEvent| seen.borrow_mut().push((e.stage, e.fraction));
        let texts = ["a brown fox", "jumps over"];

        assessor(ocr_for_rows(&texts, 0.95, LINE_H, GAP))
            .run(&[page_source(2)], &spec(&texts), &CancellationToken::new(), Some(&record))
            .unwrap();

        let seen = seen.into_inner();
        assert_eq!(seen.first().map(|s| s.0), Some(Stage::Loading));
        assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(seen.last().map(|s| s.1), Some(1.0));
    }

    #[test]
    fn invalid_spec_is_an_error() {
        let result = assessor(OcrPageResponse::default()).run(
            &[page_source(1)],
            &AssignmentSpec::new(Vec::new()),
            &CancellationToken::new(),
            None,
        );
        assert!(matches!(result, Err(AssessmentError::InvalidSpec(_))));
    }

    #[test]
    fn unreadable_upload_is_an_error() {
        let garbage = PageSource::Image([0xAB; 200].to_vec());
        let result = assessor(OcrPageResponse::default()).run(
            &[garbage],
            &spec(&["a"]),
            &CancellationToken::new(),
            None,
        );
        assert!(matches!(result, Err(AssessmentError::ImageDecode(_))));
    }
}
