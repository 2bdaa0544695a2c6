use crate::Vec2;

// Concrete geometry lives outside this crate; the solver only ever asks
// for signed distances and closest points.
pub trait Surface2: Send + Sync {
    fn signed_distance(&self, point: Vec2) -> f32;

    fn closest_point(&self, point: Vec2) -> Vec2 {
        // One gradient-descent step is enough for the solver's use: the
        // boundary code only queries near the surface.
        let d = self.signed_distance(point);
        let n = self.normal(point);
        point.sub(n.scale(d))
    }

    fn normal(&self, point: Vec2) -> Vec2 {
        let eps = 1e-3;
        let dx = self.signed_distance(Vec2::new(point.x + eps, point.y))
            - self.signed_distance(Vec2::new(point.x - eps, point.y));
        let dy = self.signed_distance(Vec2::new(point.x, point.y + eps))
            - self.signed_distance(Vec2::new(point.x, point.y - eps));
        Vec2::new(dx, dy).normalized_or_zero()
    }

    fn is_inside(&self, point: Vec2) -> bool {
        self.signed_distance(point) < 0.0
    }
}

pub enum ColliderMotion {
    Rigid {
        linear: Vec2,
        angular: f32,
        center: Vec2,
    },
    Custom(Box<dyn Fn(Vec2) -> Vec2 + Send + Sync>),
}

pub struct Collider2 {
    surface: Box<dyn Surface2>,
    motion: ColliderMotion,
    friction: f32,
}

impl Collider2 {
    pub fn new(surface: Box<dyn Surface2>, motion: ColliderMotion, friction: f32) -> Self {
        Self {
            surface,
            motion,
            friction: friction.max(0.0),
        }
    }

    pub fn stationary(surface: Box<dyn Surface2>) -> Self {
        Self::new(
            surface,
            ColliderMotion::Rigid {
                linear: Vec2::zero(),
                angular: 0.0,
                center: Vec2::zero(),
            },
            0.0,
        )
    }

    pub fn surface(&self) -> &dyn Surface2 {
        self.surface.as_ref()
    }

    pub fn friction(&self) -> f32 {
        self.friction
    }

    pub fn set_friction(&mut self, friction: f32) {
        self.friction = friction.max(0.0);
    }

    pub fn velocity_at(&self, point: Vec2) -> Vec2 {
        match &self.motion {
            ColliderMotion::Rigid {
                linear,
                angular,
                center,
            } => {
                let r = point.sub(*center);
                linear.add(Vec2::new(-angular * r.y, angular * r.x))
            }
            ColliderMotion::Custom(f) => f(point),
        }
    }
}
