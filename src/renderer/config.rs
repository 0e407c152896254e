use ash::vk;

/// Renderer knobs that the draw path treats as fixed for the lifetime of the
/// context. Everything the frame loop assumes to be singular (one queue, one
/// frame in flight) is spelled out here so variants stay additive.
#[derive(Debug)]
pub struct RenderConfig {
    pub window_title: String,

    /// Queue family the single device queue is created from.
    pub queue_family_index: u32,
    pub queue_priority: f32,

    /// Upper bound for host-side fence and image-acquire waits, in nanoseconds.
    pub gpu_timeout_ns: u64,

    pub present_mode: vk::PresentModeKHR,
    pub clear_color: [f32; 4],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            window_title: "ember".into(),
            queue_family_index: 0,
            queue_priority: 0.0,
            gpu_timeout_ns: 1_000_000_000,
            present_mode: vk::PresentModeKHR::FIFO,
            clear_color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}
