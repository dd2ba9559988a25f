//! 流水线编排器：显式状态机驱动
//!
//! 每一步：检查取消 → 执行当前阶段 → 得到 (补丁, 事件) → 合并补丁 → `transition` 求下一阶段。
//! 阶段严格串行；只有 TOOL_EXEC 内部并发执行同一轮的多个工具调用，并在汇合后才回到 RESEARCHING。

use std::path::Path;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::machine::{transition, Event, Stage};
use crate::core::{FailureKind, PipelineError, RunError, RunState, RunStore, StatePatch};
use crate::memory::LogEntry;
use crate::pipeline::events::preview;
use crate::pipeline::{
    decode_record, send_event, Persister, PipelineEvent, ResearchLoop, Summarizer,
    VisionAssessment, VisionStage,
};
use crate::tools::ToolInvocation;

/// 工具结果预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

pub struct Orchestrator {
    vision: VisionStage,
    research: ResearchLoop,
    summarizer: Summarizer,
    persister: Persister,
    event_tx: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

/// run_tracked 的进度回写目标
struct Tracking<'a> {
    runs: &'a RunStore,
    generation: u64,
}

/// 单次驱动内的临时数据（不属于 RunState）
#[derive(Default)]
struct Cursor {
    iterations: usize,
    pending_calls: Vec<ToolInvocation>,
}

impl Orchestrator {
    pub fn new(
        vision: VisionStage,
        research: ResearchLoop,
        summarizer: Summarizer,
        persister: Persister,
    ) -> Self {
        Self {
            vision,
            research,
            summarizer,
            persister,
            event_tx: None,
        }
    }

    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn max_research_iterations(&self) -> usize {
        self.research.max_iterations()
    }

    /// 执行一次完整流水线；返回后不保留任何状态
    pub async fn run(
        &self,
        username: &str,
        image_ref: impl AsRef<Path>,
        thread_id: &str,
    ) -> Result<RunState, PipelineError> {
        self.run_with_cancel(username, image_ref, thread_id, CancellationToken::new())
            .await
    }

    /// 同 `run`，但在每个阶段开始前（含研究循环每一轮）检查取消；进行中的模型/工具调用不会被打断
    pub async fn run_with_cancel(
        &self,
        username: &str,
        image_ref: impl AsRef<Path>,
        thread_id: &str,
        cancel: CancellationToken,
    ) -> Result<RunState, PipelineError> {
        let mut state = RunState::new(thread_id, username, image_ref.as_ref());
        self.drive(&mut state, &cancel, None).await?;
        Ok(state)
    }

    /// 在 RunStore 中登记本次运行（可通过 `RunStore::cancel` 取消）；每个阶段合并后写回进度，结束后写回最终状态
    ///
    /// 同一 thread_id 被新运行覆盖时，本次运行按 generation 判断归属，不会改写或移除新运行的槽位。
    pub async fn run_tracked(
        &self,
        runs: &RunStore,
        username: &str,
        image_ref: impl AsRef<Path>,
        thread_id: &str,
    ) -> Result<RunState, PipelineError> {
        let mut state = RunState::new(thread_id, username, image_ref.as_ref());
        let ticket = runs.create(state.clone()).await;
        let tracking = Tracking {
            runs,
            generation: ticket.generation,
        };

        match self
            .drive(&mut state, &ticket.cancel_token, Some(&tracking))
            .await
        {
            Ok(()) => {
                if !runs.finish(ticket.generation, state.clone()).await {
                    tracing::debug!(thread_id, "run slot superseded, final state not stored");
                }
                Ok(state)
            }
            Err(e) => {
                runs.release(thread_id, ticket.generation).await;
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        state: &mut RunState,
        cancel: &CancellationToken,
        tracking: Option<&Tracking<'_>>,
    ) -> Result<(), PipelineError> {
        let mut cursor = Cursor::default();
        let mut stage = transition(Stage::Start, Event::Begin)?;

        while !stage.is_terminal() {
            if cancel.is_cancelled() {
                tracing::warn!(thread_id = %state.thread_id, stage = ?stage, "run cancelled");
                return Err(PipelineError::Cancelled(stage));
            }
            tracing::info!(thread_id = %state.thread_id, stage = ?stage, "stage entered");
            send_event(
                self.event_tx.as_ref(),
                PipelineEvent::StageEntered {
                    thread_id: state.thread_id.clone(),
                    stage,
                },
            );

            let (patch, event) = self.step(stage, state, &mut cursor).await?;
            state.merge(patch);
            if let Some(t) = tracking {
                t.runs.update(t.generation, state.clone()).await;
            }
            stage = transition(stage, event)?;
        }

        // Summarizer 客户端在所有运行间共享，这里是进程内累计值
        let (prompt, completion, total) = self.summarizer.token_usage();
        tracing::info!(
            thread_id = %state.thread_id,
            save_status = ?state.save_status,
            errors = state.errors.len(),
            messages = state.messages.len(),
            summarizer_cumulative_prompt_tokens = prompt,
            summarizer_cumulative_completion_tokens = completion,
            summarizer_cumulative_total_tokens = total,
            "run finished"
        );
        send_event(
            self.event_tx.as_ref(),
            PipelineEvent::Finished {
                thread_id: state.thread_id.clone(),
                save_status: state.save_status,
                error_count: state.errors.len(),
            },
        );
        Ok(())
    }

    /// 执行单个阶段，返回补丁与事件；阶段本身不修改 RunState
    async fn step(
        &self,
        stage: Stage,
        state: &RunState,
        cursor: &mut Cursor,
    ) -> Result<(StatePatch, Event), PipelineError> {
        match stage {
            Stage::Vision => {
                let assessment = self.vision.analyze_image(&state.image_ref).await?;
                tracing::info!(thread_id = %state.thread_id, is_valid = assessment.is_valid(), "vision assessed");
                Ok((StatePatch::vision(assessment), Event::Assessed))
            }

            Stage::Gate => match &state.vision_assessment {
                Some(VisionAssessment::Valid { report }) => Ok((
                    StatePatch::messages(self.research.seed(report)),
                    Event::ImageValid,
                )),
                Some(VisionAssessment::Invalid { reason }) => Ok((
                    StatePatch {
                        error_reason: Some(reason.clone()),
                        ..StatePatch::default()
                    },
                    Event::ImageInvalid,
                )),
                None => Err(PipelineError::schema("vision", "no assessment before gate")),
            },

            Stage::Researching => self.research_step(state, cursor).await,

            Stage::ToolExec => {
                let calls = std::mem::take(&mut cursor.pending_calls);
                for call in &calls {
                    send_event(
                        self.event_tx.as_ref(),
                        PipelineEvent::ToolCall {
                            call_id: call.call_id.clone(),
                            tool: call.name.clone(),
                            args: call.arguments.clone(),
                        },
                    );
                }
                let results = self.research.dispatch(&calls).await;

                let mut patch = StatePatch::default();
                for result in results {
                    send_event(
                        self.event_tx.as_ref(),
                        PipelineEvent::ToolResult {
                            call_id: result.call_id.clone(),
                            tool: result.name.clone(),
                            ok: !result.is_error(),
                            preview: preview(&result.content_for_model(), RESULT_PREVIEW_CHARS),
                        },
                    );
                    if result.is_error() {
                        patch.errors.push(RunError::new(
                            FailureKind::ToolInvocationFailure,
                            format!("{} [{}]: {}", result.name, result.call_id, result.content_for_model()),
                        ));
                    }
                    patch.messages.push(LogEntry::ToolResult(result));
                }
                Ok((patch, Event::ToolsJoined))
            }

            Stage::Summarizing => {
                let info = state.extracted_info.as_deref().unwrap_or_default();
                let raw = self.summarizer.summarize(info).await?;
                match decode_record(&raw) {
                    Ok(record) => Ok((
                        StatePatch {
                            final_record: Some(record),
                            ..StatePatch::default()
                        },
                        Event::Summarized,
                    )),
                    Err(e) => {
                        tracing::warn!(thread_id = %state.thread_id, error = %e, "malformed nutrition record");
                        Ok((
                            StatePatch::error(RunError::new(FailureKind::MalformedRecord, e))
                                .with_save_status(false),
                            Event::Malformed,
                        ))
                    }
                }
            }

            Stage::Persisting => {
                let record = state.final_record.as_ref().ok_or(PipelineError::IllegalTransition {
                    from: Stage::Persisting,
                    event: "persist_without_record",
                })?;
                let outcome = self.persister.persist(&state.username, record).await;
                Ok((
                    StatePatch {
                        save_status: Some(outcome.save_status),
                        errors: outcome.errors,
                        ..StatePatch::default()
                    },
                    Event::PersistAttempted,
                ))
            }

            Stage::Start | Stage::End => Err(PipelineError::IllegalTransition {
                from: stage,
                event: "step",
            }),
        }
    }

    /// RESEARCHING：按研究模型调用次数计数；第 max 次调用仍请求工具即判定超出预算，本轮工具不再执行
    async fn research_step(
        &self,
        state: &RunState,
        cursor: &mut Cursor,
    ) -> Result<(StatePatch, Event), PipelineError> {
        // 研究模型只接受每个 tool_call 都已有结果的上下文
        let unanswered = state.messages.unanswered_calls();
        if !unanswered.is_empty() {
            tracing::error!(thread_id = %state.thread_id, pending = unanswered.len(), "tool calls without results");
            return Err(PipelineError::IllegalTransition {
                from: Stage::Researching,
                event: "unanswered_tool_calls",
            });
        }

        let max = self.research.max_iterations();
        cursor.iterations += 1;
        send_event(
            self.event_tx.as_ref(),
            PipelineEvent::LoopIteration {
                iteration: cursor.iterations,
                max_iterations: max,
            },
        );

        let turn = self.research.think(&state.messages).await?;

        if !turn.requests_tools() {
            tracing::info!(thread_id = %state.thread_id, iteration = cursor.iterations, "research findings");
            return Ok((
                StatePatch {
                    extracted_info: Some(turn.content.clone()),
                    messages: vec![LogEntry::model(turn.content, Vec::new())],
                    ..StatePatch::default()
                },
                Event::Findings,
            ));
        }

        if cursor.iterations >= max {
            tracing::warn!(thread_id = %state.thread_id, max, "research loop budget exceeded");
            let dropped: Vec<&str> = turn.tool_calls.iter().map(|c| c.name.as_str()).collect();
            return Ok((
                StatePatch::error(RunError::new(
                    FailureKind::LoopBudgetExceeded,
                    format!(
                        "research model still requested tools {:?} after {} iterations",
                        dropped, max
                    ),
                ))
                .with_save_status(false),
                Event::BudgetExceeded,
            ));
        }

        cursor.pending_calls = turn.tool_calls.clone();
        Ok((
            StatePatch::messages(vec![LogEntry::model(turn.content, turn.tool_calls)]),
            Event::ToolsRequested,
        ))
    }
}
