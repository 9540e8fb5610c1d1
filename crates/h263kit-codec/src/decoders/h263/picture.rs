//! 图像缓冲与参考图像环.
//!
//! `PictureManager` 负责分配当前图像并接收行进度/水平带通知,
//! `PictureRing` 以 current / last / next 三个槽位管理参考图像的轮转.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use h263kit_core::{KitError, KitResult, PixelFormat};
use log::debug;

use crate::frame::{PictureType, VideoFrame};

// ============================================================================
// 帧进度
// ============================================================================

#[derive(Debug, Default)]
struct ProgressState {
    setup_published: bool,
    rows_decoded: usize,
}

/// 帧级进度, 供依赖本帧的其它线程等待
#[derive(Debug, Default)]
pub struct FrameProgress {
    state: Mutex<ProgressState>,
    cond: Condvar,
}

impl FrameProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 发布 setup 阶段完成 (缓冲布局与像素格式已确定)
    pub fn publish_setup(&self) {
        self.lock().setup_published = true;
        self.cond.notify_all();
    }

    /// setup 是否已发布
    pub fn is_setup_published(&self) -> bool {
        self.lock().setup_published
    }

    /// 报告已完成的宏块行数 (只增不减)
    pub fn report_rows(&self, rows: usize) {
        let mut state = self.lock();
        if rows > state.rows_decoded {
            state.rows_decoded = rows;
            self.cond.notify_all();
        }
    }

    /// 已完成的宏块行数
    pub fn rows_decoded(&self) -> usize {
        self.lock().rows_decoded
    }

    /// 阻塞直到至少 `rows` 行完成
    pub fn wait_rows(&self, rows: usize) {
        let mut state = self.lock();
        while state.rows_decoded < rows {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

// ============================================================================
// 图像
// ============================================================================

/// 一个解码中的或已完成的图像
#[derive(Debug)]
pub struct Picture {
    pub frame: VideoFrame,
    pub progress: Arc<FrameProgress>,
}

impl Picture {
    pub fn new(frame: VideoFrame) -> Self {
        Self {
            frame,
            progress: Arc::new(FrameProgress::new()),
        }
    }
}

/// 图像缓冲管理
pub trait PictureManager: Send {
    /// 按新尺寸与像素格式重建缓冲池
    fn provision(&mut self, width: u32, height: u32, pixel_format: PixelFormat) -> KitResult<()>;

    /// 取得当前帧独占使用的图像
    fn acquire_current(&mut self, pict_type: PictureType) -> KitResult<Picture>;

    /// 报告当前帧已完成到第 `row` 行 (宏块行, 含)
    fn report_row_progress(&mut self, picture: &Picture, row: usize);

    /// 水平带通知 (像素行偏移与高度)
    fn emit_band(&mut self, picture: &Picture, y: usize, height: usize);
}

/// 水平带回调
pub type BandListener = Box<dyn FnMut(usize, usize) + Send>;

/// 默认缓冲池: 每帧新分配图像
#[derive(Default)]
pub struct FramePool {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    band_listener: Option<BandListener>,
}

impl FramePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册水平带回调
    pub fn with_band_listener(mut self, listener: BandListener) -> Self {
        self.band_listener = Some(listener);
        self
    }

    /// 当前配置的尺寸
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl PictureManager for FramePool {
    fn provision(&mut self, width: u32, height: u32, pixel_format: PixelFormat) -> KitResult<()> {
        if width == 0 || height == 0 {
            return Err(KitError::InvalidArgument(format!(
                "图像尺寸无效: {}x{}",
                width, height
            )));
        }
        self.width = width;
        self.height = height;
        self.pixel_format = pixel_format;
        debug!("缓冲池重建: {}x{} {}", width, height, pixel_format);
        Ok(())
    }

    fn acquire_current(&mut self, pict_type: PictureType) -> KitResult<Picture> {
        if self.width == 0 || self.height == 0 {
            return Err(KitError::Internal("缓冲池尚未分配".into()));
        }
        let mut frame = VideoFrame::new(self.width, self.height, self.pixel_format);
        frame.picture_type = pict_type;
        frame.is_keyframe = pict_type == PictureType::I;
        Ok(Picture::new(frame))
    }

    fn report_row_progress(&mut self, picture: &Picture, row: usize) {
        picture.progress.report_rows(row + 1);
    }

    fn emit_band(&mut self, _picture: &Picture, y: usize, height: usize) {
        if let Some(listener) = self.band_listener.as_mut() {
            listener(y, height);
        }
    }
}

// ============================================================================
// 参考图像环
// ============================================================================

/// current / last / next 三槽参考环
///
/// 解码期间: P 帧以 next 为前向参考; B 帧以 last 为前向参考, next 为后向参考.
/// 帧结束时参考帧提交: last <- next, next <- current.
#[derive(Debug, Default)]
pub struct PictureRing {
    current: Option<Picture>,
    last: Option<Arc<Picture>>,
    next: Option<Arc<Picture>>,
}

impl PictureRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// 放入当前帧
    pub fn begin(&mut self, picture: Picture) {
        self.current = Some(picture);
    }

    pub fn current(&self) -> Option<&Picture> {
        self.current.as_ref()
    }

    pub fn last(&self) -> Option<&Arc<Picture>> {
        self.last.as_ref()
    }

    pub fn next(&self) -> Option<&Arc<Picture>> {
        self.next.as_ref()
    }

    /// 前向参考
    pub fn forward_reference(&self, pict_type: PictureType) -> Option<&Picture> {
        match pict_type {
            PictureType::B => self.last.as_deref(),
            _ => self.next.as_deref(),
        }
    }

    /// 后向参考 (仅 B 帧)
    pub fn backward_reference(&self, pict_type: PictureType) -> Option<&Picture> {
        match pict_type {
            PictureType::B => self.next.as_deref(),
            _ => None,
        }
    }

    /// 同时借出当前帧 (可变) 与前向参考 (只读)
    pub fn split_current(
        &mut self,
        pict_type: PictureType,
    ) -> (Option<&mut Picture>, Option<&Picture>) {
        let forward = match pict_type {
            PictureType::B => self.last.as_deref(),
            _ => self.next.as_deref(),
        };
        (self.current.as_mut(), forward)
    }

    /// 提交当前帧, 参考帧时轮转 last/next
    pub fn commit(&mut self, is_reference: bool) -> Option<Arc<Picture>> {
        let current = Arc::new(self.current.take()?);
        if is_reference {
            self.last = self.next.take();
            self.next = Some(Arc::clone(&current));
        }
        Some(current)
    }

    /// 丢弃未完成的当前帧
    pub fn abandon_current(&mut self) {
        self.current = None;
    }

    /// 取出 next 参考 (排空时输出)
    pub fn take_next(&mut self) -> Option<Arc<Picture>> {
        self.next.take()
    }

    /// 清空所有槽位
    pub fn clear(&mut self) {
        self.current = None;
        self.last = None;
        self.next = None;
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn picture(tag: i64) -> Picture {
        let mut frame = VideoFrame::new(16, 16, PixelFormat::Yuv420p);
        frame.pts = tag;
        Picture::new(frame)
    }

    #[test]
    fn test_ring_rotation() {
        let mut ring = PictureRing::new();
        ring.begin(picture(1));
        ring.commit(true);
        assert!(ring.last().is_none());
        assert_eq!(ring.next().map(|p| p.frame.pts), Some(1));

        ring.begin(picture(2));
        assert_eq!(
            ring.forward_reference(PictureType::P).map(|p| p.frame.pts),
            Some(1)
        );
        ring.commit(true);
        assert_eq!(ring.last().map(|p| p.frame.pts), Some(1));
        assert_eq!(ring.next().map(|p| p.frame.pts), Some(2));

        // 非参考帧不改变参考槽
        ring.begin(picture(3));
        let committed = ring.commit(false);
        assert_eq!(committed.map(|p| p.frame.pts), Some(3));
        assert_eq!(ring.next().map(|p| p.frame.pts), Some(2));
        assert_eq!(
            ring.backward_reference(PictureType::B).map(|p| p.frame.pts),
            Some(2)
        );

        assert_eq!(ring.take_next().map(|p| p.frame.pts), Some(2));
        assert!(ring.next().is_none());
        ring.clear();
        assert!(ring.last().is_none());
    }

    #[test]
    fn test_progress_wait_across_threads() {
        let progress = Arc::new(FrameProgress::new());
        let waiter = {
            let progress = Arc::clone(&progress);
            thread::spawn(move || {
                progress.wait_rows(3);
                progress.rows_decoded()
            })
        };
        progress.publish_setup();
        for row in 1..=3 {
            progress.report_rows(row);
        }
        assert!(waiter.join().unwrap() >= 3);
        assert!(progress.is_setup_published());
        progress.report_rows(1);
        assert_eq!(progress.rows_decoded(), 3);
    }

    #[test]
    fn test_frame_pool_requires_provision() {
        let mut pool = FramePool::new();
        assert!(pool.acquire_current(PictureType::I).is_err());
        assert!(pool.provision(0, 16, PixelFormat::Yuv420p).is_err());
        pool.provision(32, 16, PixelFormat::Yuv420p).unwrap();
        let pic = pool.acquire_current(PictureType::I).unwrap();
        assert!(pic.frame.is_keyframe);
        assert_eq!(pool.dimensions(), (32, 16));
    }

    #[test]
    fn test_band_listener() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let bands = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&bands);
        let mut pool = FramePool::new().with_band_listener(Box::new(move |_, h| {
            counter.fetch_add(h, Ordering::SeqCst);
        }));
        pool.provision(16, 32, PixelFormat::Yuv420p).unwrap();
        let pic = pool.acquire_current(PictureType::P).unwrap();
        pool.emit_band(&pic, 0, 16);
        pool.emit_band(&pic, 16, 16);
        pool.report_row_progress(&pic, 1);
        assert_eq!(bands.load(Ordering::SeqCst), 32);
        assert_eq!(pic.progress.rows_decoded(), 2);
    }
}
