use rand::Rng;

/// Velocity components smaller than this are treated as zero.
pub const EPSILON: f64 = 1e-9;

///Represents a vector in 2D arena space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector2 {
    ///Value along the x-axis.
    /// Positive direction is to the right.
    pub x: f64,
    ///Value along the y-axis.
    /// Positive direction is down, the top boundary is y = 0.
    pub y: f64,
}

impl Vector2 {
    pub fn new(x: f64, y: f64) -> Self {
        Vector2 { x, y }
    }

    ///Returns the unit vector pointing at `degrees`.
    pub fn from_degrees(degrees: i32) -> Vector2 {
        let radians = (degrees as f64).to_radians();
        Vector2 {
            x: radians.cos(),
            y: radians.sin(),
        }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f64) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }
}

///Draws a rotation in [0, 360) that is not axis aligned.
pub fn random_rotation<R: Rng + ?Sized>(rng: &mut R) -> i32 {
    loop {
        let rotation = rng.gen_range(0..360);
        if rotation % 90 != 0 {
            return rotation;
        }
    }
}

///The ball of one game.
#[derive(Debug, Clone, PartialEq)]
pub struct Ball {
    pub position: Vector2,
    ///Direction of travel in degrees, [0, 360).
    pub rotation: i32,
    ///Pixels travelled per tick.
    pub speed: i32,
    pub max_speed: i32,
    ///Radius in pixels.
    pub size: f64,
}

impl Ball {
    pub fn new<R: Rng + ?Sized>(
        center: Vector2,
        speed: i32,
        max_speed: i32,
        size: f64,
        rng: &mut R,
    ) -> Self {
        Ball {
            position: center,
            rotation: random_rotation(rng),
            speed,
            max_speed,
            size,
        }
    }

    ///Returns the displacement of the ball for one tick.
    pub fn velocity(&self) -> Vector2 {
        Vector2::from_degrees(self.rotation).scale(self.speed as f64)
    }

    ///Bounces off a vertical wall.
    pub fn reflect_horizontal(&mut self) {
        self.rotation = (180 - self.rotation).rem_euclid(360);
    }

    ///Bounces off a horizontal surface (paddle or wall).
    pub fn reflect_vertical(&mut self) {
        self.rotation = (360 - self.rotation).rem_euclid(360);
    }

    pub fn accelerate(&mut self) {
        self.speed = (self.speed + 1).min(self.max_speed);
    }

    ///Puts the ball back in the center with base speed and a fresh direction.
    pub fn reset<R: Rng + ?Sized>(&mut self, center: Vector2, speed: i32, rng: &mut R) {
        self.position = center;
        self.speed = speed;
        self.rotation = random_rotation(rng);
    }
}
