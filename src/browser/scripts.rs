//! Script bodies evaluated inside pages. Each one `return`s a JSON value.

/// Navigation Timing response status, 0 when the browser does not expose it
pub const NAVIGATION_STATUS: &str = r#"
const nav = window.performance.getEntriesByType('navigation')[0];
return nav && typeof nav.responseStatus === 'number' ? nav.responseStatus : 0;
"#;

/// Readiness snapshot used by the idle-navigation wait
pub const READINESS: &str = r#"
return {
  complete: document.readyState === 'complete',
  resources: window.performance.getEntriesByType('resource').length,
};
"#;

/// Paint timings; missing entries report 0
pub const PAINT_TIMINGS: &str = r#"
const paint = window.performance.getEntriesByType('paint');
const fcp = paint.find(p => p.name === 'first-contentful-paint');
let lcp = 0;
try {
  const entries = window.performance.getEntriesByType('largest-contentful-paint');
  if (entries.length > 0) { lcp = entries[entries.length - 1].startTime; }
} catch (e) {}
return {
  firstContentfulPaint: fcp ? fcp.startTime : 0,
  largestContentfulPaint: lcp,
  timeToInteractive: window.performance.now(),
};
"#;

/// Capability probes, one boolean per feature
pub const FEATURE_PROBES: &str = r#"
const style = document.documentElement.style;
const canvas = () => document.createElement('canvas');
return {
  flexbox: 'flexBasis' in style,
  grid: 'gridTemplateColumns' in style,
  cssVariables: !!(window.CSS && window.CSS.supports && window.CSS.supports('--fake-var', '0')),
  fetch: 'fetch' in window,
  promises: 'Promise' in window,
  asyncAwait: (async () => {})() instanceof Promise,
  webp: (() => {
    const c = canvas();
    if (c.getContext && c.getContext('2d')) {
      return c.toDataURL('image/webp').indexOf('data:image/webp') === 0;
    }
    return false;
  })(),
  webgl: (() => {
    const c = canvas();
    return !!(window.WebGLRenderingContext && (c.getContext('webgl') || c.getContext('experimental-webgl')));
  })(),
  serviceWorker: 'serviceWorker' in navigator,
  pushApi: 'PushManager' in window,
};
"#;

pub const FORM_PROBE: &str = r#"
return document.createElement('form') instanceof HTMLFormElement;
"#;

pub const ANIMATION_PROBE: &str = r#"
return 'animationName' in document.documentElement.style;
"#;

/// Width the responsive probe resizes to
pub const MOBILE_WIDTH: u32 = 375;
pub const MOBILE_HEIGHT: u32 = 667;

pub const VIEWPORT_WIDTH: &str = r#"
return window.innerWidth;
"#;

/// Difference between outer window and layout viewport, used to size the window
pub const WINDOW_CHROME: &str = r#"
return [window.outerWidth - window.innerWidth, window.outerHeight - window.innerHeight];
"#;
